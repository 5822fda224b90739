use crate::coords::RoomCoords;

/// Why a map document could not be fetched.
#[derive(Debug)]
pub enum FetchError {
    /// The document does not exist. Expected for zones without rooms.
    NotFound,
    Status(u16),
    Io(std::io::Error),
    Transport(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound)
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::NotFound => write!(f, "not found"),
            FetchError::Status(s) => write!(f, "http status {s}"),
            FetchError::Io(e) => write!(f, "io: {e}"),
            FetchError::Transport(s) => write!(f, "transport: {s}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            FetchError::NotFound
        } else {
            FetchError::Io(e)
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(s) if s == reqwest::StatusCode::NOT_FOUND => FetchError::NotFound,
            Some(s) => FetchError::Status(s.as_u16()),
            None => FetchError::Transport(e.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum MapError {
    Fetch { path: String, err: FetchError },
    Json { path: String, err: serde_json::Error },
    /// A document lacks keys we cannot work without.
    MissingFields { what: String, fields: Vec<&'static str> },
    OutOfBounds(RoomCoords),
    /// A `description` tag closed with no `name` before it. Either the markup
    /// is buggy or someone is feeding us fake tags.
    DescriptionWithoutName { desc: String },
    TrackerJoin(String),
}

impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapError::Fetch { path, err } => write!(f, "fetching {path}: {err}"),
            MapError::Json { path, err } => write!(f, "parsing {path}: {err}"),
            MapError::MissingFields { what, fields } => {
                write!(f, "missing properties in {what}: {}", fields.join(", "))
            }
            MapError::OutOfBounds(c) => write!(f, "{c} is outside the map"),
            MapError::DescriptionWithoutName { desc } => {
                let head = desc.chars().take(50).collect::<String>();
                write!(f, "room description without a room name: {head}...")
            }
            MapError::TrackerJoin(s) => write!(f, "map tracker task failed: {s}"),
        }
    }
}

impl std::error::Error for MapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapError::Fetch { err, .. } => Some(err),
            MapError::Json { err, .. } => Some(err),
            _ => None,
        }
    }
}
