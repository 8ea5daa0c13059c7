//! Plain-text asset table for `kura list`.

use kura::AssetRecord;

const HEADERS: [&str; 5] = ["ID", "Name", "Image", "Mesh", "Description"];

fn marker(field: Option<&str>) -> &'static str {
    match field {
        Some(value) if !value.is_empty() => "ok",
        _ => "None",
    }
}

fn row(record: &AssetRecord) -> [String; 5] {
    [
        record.id.to_string(),
        record.name.clone(),
        marker(record.image_path.as_deref()).to_string(),
        marker(record.mesh_path.as_deref()).to_string(),
        marker(record.description.as_deref()).to_string(),
    ]
}

/// Renders one line per asset under a header, columns padded to fit.
pub fn render(records: &[AssetRecord]) -> String {
    let rows: Vec<[String; 5]> = records.iter().map(row).collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_line(&mut out, &HEADERS.map(String::from), &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(rule.join("  ").trim_end());
    out.push('\n');
    for row in &rows {
        push_line(&mut out, row, &widths);
    }
    out
}

fn push_line(out: &mut String, cells: &[String; 5], widths: &[usize; 5]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}
