pub mod tracking;

pub use tracking::{ContentType, OwnerId, TrackingKey, DISABLED_CONTENT_ID};
