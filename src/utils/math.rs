use std::fmt;

/// 3D vector for grid coordinates and look-at directions
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Parse vector from the grid's wire format: "[r1.0, r0.0, r0.0]" or "r1,0,0"
    pub fn parse_grid_format(value: &str) -> Result<Self, String> {
        let cleaned = value
            .trim_start_matches(['r', '['])
            .trim_end_matches(']')
            .replace('r', "");

        let coords: Result<Vec<f32>, _> = cleaned
            .split(',')
            .map(|s| s.trim().parse())
            .collect();

        match coords {
            Ok(coords) if coords.len() >= 3 => {
                Ok(Self::new(coords[0], coords[1], coords[2]))
            }
            _ => Err(format!("Invalid vector format: {}", value)),
        }
    }

    pub fn to_array(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[r{}, r{}, r{}]", self.x, self.y, self.z)
    }
}

/// Parsers for the grid's text data formats
pub mod parsing {
    /// Parse a boolean from grid format
    pub fn parse_bool(value: &str) -> Result<bool, String> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(format!("Invalid boolean value: {}", value)),
        }
    }

    /// Parse a UUID from string
    pub fn parse_uuid(value: &str) -> Result<uuid::Uuid, String> {
        uuid::Uuid::parse_str(value)
            .map_err(|e| format!("Invalid UUID: {} - {}", value, e))
    }

    /// Parse an array of strings from comma-separated format
    pub fn parse_string_array(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracketed_grid_vector() {
        let v = Vector3::parse_grid_format("[r1.5, r0.0, r-2.0]").unwrap();
        assert_eq!(v, Vector3::new(1.5, 0.0, -2.0));
    }

    #[test]
    fn parses_bare_grid_vector() {
        let v = Vector3::parse_grid_format("r128,128,23.5").unwrap();
        assert_eq!(v, Vector3::new(128.0, 128.0, 23.5));
    }

    #[test]
    fn rejects_short_vector() {
        assert!(Vector3::parse_grid_format("[r1.0, r2.0]").is_err());
    }

    #[test]
    fn parses_bool_variants() {
        assert!(parsing::parse_bool("true").unwrap());
        assert!(parsing::parse_bool("1").unwrap());
        assert!(!parsing::parse_bool("false").unwrap());
        assert!(parsing::parse_bool("maybe").is_err());
    }
}
