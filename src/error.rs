use std::error::Error;
use std::fmt;

/// Contract violations the engine reports to its caller.
///
/// Data-quality problems (unknown ingredients, empty recipes, missing bands)
/// are never errors; they degrade to zero contributions or skipped
/// dimensions and surface as warnings instead.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    UnsupportedProductType(String),
    InvalidQuantity {
        ingredient_id: String,
        quantity: f64,
    },
    InvalidBounds {
        ingredient_id: String,
        min: f64,
        max: f64,
    },
    InvalidOptions(String),
    Profile(String),
    Catalog(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::UnsupportedProductType(name) => {
                write!(f, "Unsupported product type: {}", name)
            }
            EngineError::InvalidQuantity {
                ingredient_id,
                quantity,
            } => write!(
                f,
                "Invalid quantity for '{}': {} (quantities must be finite and >= 0)",
                ingredient_id, quantity
            ),
            EngineError::InvalidBounds {
                ingredient_id,
                min,
                max,
            } => write!(
                f,
                "Invalid bounds for '{}': min {} / max {}",
                ingredient_id, min, max
            ),
            EngineError::InvalidOptions(msg) => write!(f, "Invalid options: {}", msg),
            EngineError::Profile(msg) => write!(f, "Parameter profile error: {}", msg),
            EngineError::Catalog(msg) => write!(f, "Ingredient catalog error: {}", msg),
        }
    }
}

impl Error for EngineError {}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Profile(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = EngineError::UnsupportedProductType("frozen_yogurt".to_string());
        assert_eq!(err.to_string(), "Unsupported product type: frozen_yogurt");

        let err = EngineError::InvalidQuantity {
            ingredient_id: "milk".to_string(),
            quantity: -3.0,
        };
        assert!(err.to_string().contains("'milk'"));
        assert!(err.to_string().contains("-3"));
    }

    #[test]
    fn test_from_serde_error_maps_to_profile() {
        let err: EngineError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, EngineError::Profile(_)));
    }
}
