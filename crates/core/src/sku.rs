//! Deterministic SKU derivation from line-item metadata.
//!
//! Line items arriving from the payment processor carry a loose metadata bag
//! (category, color, size, cut details). The SKU is rebuilt from that bag
//! with a fixed template so re-delivery of the same event always derives the
//! same SKU:
//!
//! `KCT-CATEGORY-COLOR[-TYPE][-STYLE][-FIT][-SIZE]`
//!
//! Absent segments are omitted; every segment is uppercased and stripped of
//! whitespace and non-alphanumeric characters. A "one size" size is treated
//! as absent.

/// Prefix for all derived SKUs.
pub const SKU_PREFIX: &str = "KCT";

/// Size value that means "not size-differentiated" and is left off the SKU.
const ONE_SIZE: &str = "OS";

/// Metadata fed into SKU derivation. All fields are optional; missing
/// category and color fall back to fixed placeholders so the SKU is never
/// empty.
#[derive(Debug, Clone, Default)]
pub struct SkuParts<'a> {
    pub category: Option<&'a str>,
    pub color: Option<&'a str>,
    pub item_type: Option<&'a str>,
    pub style: Option<&'a str>,
    pub fit: Option<&'a str>,
    pub size: Option<&'a str>,
}

/// Derive a SKU from line-item metadata.
#[must_use]
pub fn derive_sku(parts: &SkuParts<'_>) -> String {
    let category = sanitize(parts.category.unwrap_or("unknown"));
    let color = sanitize(parts.color.unwrap_or("default"));

    let mut sku = format!("{SKU_PREFIX}-{category}-{color}");

    for segment in [parts.item_type, parts.style, parts.fit] {
        if let Some(value) = segment {
            let value = sanitize(value);
            if !value.is_empty() {
                sku.push('-');
                sku.push_str(&value);
            }
        }
    }

    if let Some(size) = parts.size {
        let size = sanitize(size);
        if !size.is_empty() && size != ONE_SIZE && size != "ONESIZE" {
            sku.push('-');
            sku.push_str(&size);
        }
    }

    sku
}

/// Uppercase and keep only ASCII alphanumerics.
fn sanitize(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_template() {
        let parts = SkuParts {
            category: Some("suits"),
            color: Some("Navy Blue"),
            item_type: Some("2-piece"),
            style: Some("notch"),
            fit: Some("slim"),
            size: Some("42R"),
        };
        assert_eq!(derive_sku(&parts), "KCT-SUITS-NAVYBLUE-2PIECE-NOTCH-SLIM-42R");
    }

    #[test]
    fn test_absent_segments_omitted() {
        let parts = SkuParts {
            category: Some("ties"),
            color: Some("red"),
            ..SkuParts::default()
        };
        assert_eq!(derive_sku(&parts), "KCT-TIES-RED");
    }

    #[test]
    fn test_missing_category_and_color_fall_back() {
        assert_eq!(derive_sku(&SkuParts::default()), "KCT-UNKNOWN-DEFAULT");
    }

    #[test]
    fn test_one_size_omitted() {
        let parts = SkuParts {
            category: Some("suspenders"),
            color: Some("black"),
            size: Some("One Size"),
            ..SkuParts::default()
        };
        assert_eq!(derive_sku(&parts), "KCT-SUSPENDERS-BLACK");
    }

    #[test]
    fn test_illegal_characters_stripped() {
        let parts = SkuParts {
            category: Some("blazers "),
            color: Some("off-white!"),
            size: Some("40 R"),
            ..SkuParts::default()
        };
        assert_eq!(derive_sku(&parts), "KCT-BLAZERS-OFFWHITE-40R");
    }

    #[test]
    fn test_deterministic() {
        let parts = SkuParts {
            category: Some("vests"),
            color: Some("burgundy"),
            fit: Some("classic"),
            size: Some("L"),
            ..SkuParts::default()
        };
        assert_eq!(derive_sku(&parts), derive_sku(&parts));
    }
}
