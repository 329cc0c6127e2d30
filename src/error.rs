use thiserror::Error;

#[derive(Error, Debug)]
pub enum WarpError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Operation cancelled by user")]
    UserCancelled,
}

impl WarpError {
    /// True when the operation stopped because the progress sink asked it to.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WarpError::UserCancelled)
    }
}

impl From<ProjError> for WarpError {
    fn from(e: ProjError) -> Self {
        WarpError::Transform(TransformError::Crs(e))
    }
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Singular affine transform (determinant is zero)")]
    SingularTransform,

    #[error("Insufficient control points: order {order} needs {required}, got {found}")]
    InsufficientControlPoints {
        order: u8,
        required: usize,
        found: usize,
    },

    #[error("Control points are degenerate: {0}")]
    DegenerateControlPoints(String),

    #[error("Unsupported polynomial order {0} (expected 1..=3)")]
    UnsupportedOrder(u8),

    #[error("Source has no geolocation arrays")]
    MissingGeolocation,

    #[error("Invalid geolocation arrays: {0}")]
    InvalidGeolocation(String),

    #[error(transparent)]
    Crs(#[from] ProjError),
}

#[derive(Error, Debug)]
pub enum ProjError {
    #[error("Unknown CRS: {0}")]
    UnknownCrs(String),

    #[error("Transform failed: {0}")]
    TransformFailed(String),
}

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Empty geometry")]
    Empty,
}
