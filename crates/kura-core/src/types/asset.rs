use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned by the record store on creation.
pub type AssetId = i64;

/// The canonical asset entity, as persisted in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Store-assigned id, immutable after creation.
    pub id: AssetId,

    /// Human-readable asset name (never empty).
    pub name: String,

    /// Semantic text used for matching and embedding.
    pub description: Option<String>,

    /// Reference to the 2D source image.
    pub image_path: Option<String>,

    /// Reference to the generated 3D mesh.
    pub mesh_path: Option<String>,
}

impl AssetRecord {
    /// Returns the text the similarity index embeds for this asset.
    ///
    /// Falls back to the name when the description is absent or blank, so
    /// every record has exactly one index entry.
    #[must_use]
    pub fn semantic_text(&self) -> &str {
        semantic_text(&self.name, self.description.as_deref())
    }

    /// Returns a copy of this record with `patch` applied.
    #[must_use]
    pub fn patched(&self, patch: &AssetPatch) -> Self {
        Self {
            id: self.id,
            name: patch.name.clone().unwrap_or_else(|| self.name.clone()),
            description: patch.description.clone().or_else(|| self.description.clone()),
            image_path: patch.image_path.clone().or_else(|| self.image_path.clone()),
            mesh_path: patch.mesh_path.clone().or_else(|| self.mesh_path.clone()),
        }
    }
}

impl fmt::Display for AssetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asset(id={}, name={:?}", self.id, self.name)?;
        if let Some(ref description) = self.description {
            write!(f, ", description={description:?}")?;
        }
        write!(f, ")")
    }
}

fn semantic_text<'a>(name: &'a str, description: Option<&'a str>) -> &'a str {
    match description {
        Some(text) if !text.trim().is_empty() => text,
        _ => name,
    }
}

/// A record that has not been assigned an id yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAsset {
    pub name: String,
    pub description: Option<String>,
    pub image_path: Option<String>,
    pub mesh_path: Option<String>,
}

impl NewAsset {
    /// Creates a new asset with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the image path.
    pub fn with_image_path(mut self, path: impl Into<String>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    /// Set the mesh path.
    pub fn with_mesh_path(mut self, path: impl Into<String>) -> Self {
        self.mesh_path = Some(path.into());
        self
    }

    /// Text that will be embedded for this asset once created.
    #[must_use]
    pub fn semantic_text(&self) -> &str {
        semantic_text(&self.name, self.description.as_deref())
    }

    /// Attaches an id, producing the persisted form.
    #[must_use]
    pub fn into_record(self, id: AssetId) -> AssetRecord {
        AssetRecord {
            id,
            name: self.name,
            description: self.description,
            image_path: self.image_path,
            mesh_path: self.mesh_path,
        }
    }
}

/// Partial update of an asset. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_path: Option<String>,
    pub mesh_path: Option<String>,
}

impl AssetPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_image_path(mut self, path: impl Into<String>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    pub fn with_mesh_path(mut self, path: impl Into<String>) -> Self {
        self.mesh_path = Some(path.into());
        self
    }

    /// Returns `true` if the patch would not change anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.image_path.is_none()
            && self.mesh_path.is_none()
    }
}
