//! Status data model: records, wire format, geodesic distance, bounded history.

pub mod geo;
pub mod record;
pub mod store;
