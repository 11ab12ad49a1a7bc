use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::path::Path;

use super::{IngredientCategory, IngredientData, InMemoryCatalog};

// Required column headers
const ID_COL: &str = "id";
const NAME_COL: &str = "name";
const FAT_COL: &str = "fat_pct";
const SUGARS_COL: &str = "sugars_pct";
const MSNF_COL: &str = "msnf_pct";
const OTHER_COL: &str = "other_solids_pct";
// Optional column headers
const CATEGORY_COL: &str = "category";
const SUGAR_TYPE_COL: &str = "sugar_type";
const SP_COL: &str = "sp_coeff";
const PAC_COL: &str = "pac_coeff";

fn parse_optional_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn optional_text(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Loads an ingredient catalog snapshot from a CSV file.
///
/// Empty or unparseable composition cells count as 0 %. Rows without an id
/// are skipped. An unknown category is reported as an error, since it would
/// silently drop the ingredient from the stabilizer/fruit shares.
pub fn load_ingredient_catalog(csv_path: &Path) -> Result<InMemoryCatalog> {
    if !csv_path.exists() {
        return Err(anyhow::anyhow!("Ingredient CSV file not found at: {:?}", csv_path));
    }

    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open ingredient CSV file at {:?}", csv_path))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = rdr.headers()?.clone();
    let required = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| anyhow::anyhow!("Column '{}' not found", name))
    };
    let optional = |name: &str| headers.iter().position(|h| h == name);

    let id_idx = required(ID_COL)?;
    let name_idx = required(NAME_COL)?;
    let fat_idx = required(FAT_COL)?;
    let sugars_idx = required(SUGARS_COL)?;
    let msnf_idx = required(MSNF_COL)?;
    let other_idx = required(OTHER_COL)?;
    let category_idx = optional(CATEGORY_COL);
    let sugar_type_idx = optional(SUGAR_TYPE_COL);
    let sp_idx = optional(SP_COL);
    let pac_idx = optional(PAC_COL);

    let mut catalog = InMemoryCatalog::new();
    for (row_index, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read record at row index {}", row_index))?;

        let id = record.get(id_idx).unwrap_or("").trim().to_string();
        if id.is_empty() {
            continue;
        }

        let pct = |idx: usize| record.get(idx).and_then(parse_optional_f64).unwrap_or(0.0);
        let text = |idx: Option<usize>| idx.and_then(|i| record.get(i)).and_then(optional_text);

        let category = match text(category_idx) {
            Some(raw) => raw
                .parse::<IngredientCategory>()
                .map_err(|e| anyhow::anyhow!("Row {} ('{}'): {}", row_index, id, e))?,
            None => IngredientCategory::Other,
        };

        let name = record
            .get(name_idx)
            .and_then(optional_text)
            .unwrap_or_else(|| id.clone());

        catalog.insert(IngredientData {
            id,
            name,
            category,
            fat_pct: pct(fat_idx),
            sugars_pct: pct(sugars_idx),
            msnf_pct: pct(msnf_idx),
            other_solids_pct: pct(other_idx),
            sugar_type: text(sugar_type_idx),
            sp_coeff: sp_idx.and_then(|i| record.get(i)).and_then(parse_optional_f64),
            pac_coeff: pac_idx.and_then(|i| record.get(i)).and_then(parse_optional_f64),
        });
    }

    if catalog.is_empty() {
        return Err(anyhow::anyhow!("No valid ingredients loaded from {:?}", csv_path));
    }

    tracing::debug!(count = catalog.len(), path = ?csv_path, "ingredient catalog loaded");
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IngredientCatalog;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv_file() -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "id,name,category,fat_pct,sugars_pct,msnf_pct,other_solids_pct,sugar_type,sp_coeff,pac_coeff")?;
        writeln!(file, "milk,Whole Milk,dairy,3.5,,8.5,,,,")?;
        writeln!(file, "cream,Cream 35%,dairy,35,,5.5,,,,")?;
        writeln!(file, "dextrose,Dextrose,sugar,,92,,,dextrose,,")?;
        writeln!(file, "honey_x,Honey,sugar,,80,,,honey,1.3,1.5")?;
        writeln!(file, ",Nameless,other,1,1,1,1,,,")?; // Empty id
        writeln!(file, "water,,,,,,,,,")?;
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn test_load_ingredient_catalog_success() -> Result<()> {
        let file = create_test_csv_file()?;
        let catalog = load_ingredient_catalog(file.path())?;

        assert_eq!(catalog.len(), 5); // nameless row skipped

        let milk = catalog.lookup("milk").unwrap();
        assert_eq!(milk.name, "Whole Milk");
        assert_eq!(milk.fat_pct, 3.5);
        assert_eq!(milk.sugars_pct, 0.0);
        assert_eq!(milk.msnf_pct, 8.5);
        assert_eq!(milk.category, IngredientCategory::Dairy);

        let dextrose = catalog.lookup("dextrose").unwrap();
        assert_eq!(dextrose.sugar_type.as_deref(), Some("dextrose"));
        assert_eq!(dextrose.sp_coeff, None);

        let honey = catalog.lookup("honey_x").unwrap();
        assert_eq!(honey.sp_coeff, Some(1.3));
        assert_eq!(honey.pac_coeff, Some(1.5));

        let water = catalog.lookup("water").unwrap();
        assert_eq!(water.name, "water"); // falls back to id
        assert_eq!(water.category, IngredientCategory::Other);
        Ok(())
    }

    #[test]
    fn test_load_ingredient_catalog_missing_column() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "id,name,fat_pct,sugars_pct,other_solids_pct")?; // no msnf_pct
        writeln!(file, "milk,Milk,3.5,0,0")?;
        file.flush()?;

        let result = load_ingredient_catalog(file.path());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains(&format!("Column '{}' not found", MSNF_COL)));
        Ok(())
    }

    #[test]
    fn test_load_ingredient_catalog_unknown_category() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "id,name,category,fat_pct,sugars_pct,msnf_pct,other_solids_pct")?;
        writeln!(file, "gravel,Gravel,rocks,0,0,0,100")?;
        file.flush()?;

        let result = load_ingredient_catalog(file.path());
        assert!(result.unwrap_err().to_string().contains("unknown ingredient category"));
        Ok(())
    }

    #[test]
    fn test_load_ingredient_catalog_headers_only() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "id,name,fat_pct,sugars_pct,msnf_pct,other_solids_pct")?;
        file.flush()?;

        let result = load_ingredient_catalog(file.path());
        assert!(result.unwrap_err().to_string().contains("No valid ingredients loaded"));
        Ok(())
    }

    #[test]
    fn test_load_ingredient_catalog_file_not_found() {
        let path = Path::new("this_file_does_not_exist.csv");
        let result = load_ingredient_catalog(path);
        assert!(result.unwrap_err().to_string().contains("Ingredient CSV file not found"));
    }
}
