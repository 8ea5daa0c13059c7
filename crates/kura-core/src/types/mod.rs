pub mod asset;
pub mod report;

pub use asset::{AssetId, AssetPatch, AssetRecord, NewAsset};
pub use report::{ImportReport, ReconcileReport};
