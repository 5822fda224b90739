/// Absolute room coordinates, within the metadata's min/max bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomCoords {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl RoomCoords {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl From<[i32; 3]> for RoomCoords {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self { x, y, z }
    }
}

impl std::fmt::Display for RoomCoords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RoomCoords({}, {}, {})", self.x, self.y, self.z)
    }
}

/// `"x,y,z"` did not hold three integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCoordsError(pub String);

impl std::fmt::Display for ParseCoordsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected x,y,z, got {:?}", self.0)
    }
}

impl std::error::Error for ParseCoordsError {}

/// Parses `x,y,z`, the form the web client accepts after `#` in its URL.
impl std::str::FromStr for RoomCoords {
    type Err = ParseCoordsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',').map(|p| p.trim().parse::<i32>());
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(x)), Some(Ok(y)), Some(Ok(z)), None) => Ok(Self { x, y, z }),
            _ => Err(ParseCoordsError(s.to_string())),
        }
    }
}
