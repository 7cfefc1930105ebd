//! Change query façade
//!
//! - `GET /history/:entity` - units of work, filtered and paginated
//! - `GET /history/:entity/versions?key=` - action ids of one row
//! - `GET /history/:entity/versions/:action_id` - snapshot of a row at one record
//! - `GET /history/:entity/attributes/:attribute?key=` - value timeline of one attribute

pub mod queries;
pub mod routes;

pub use queries::{
    attribute_versions, history, load_version, record_version_ids, AttributeVersion,
    EntityVersion, HistoryQuery,
};
pub use routes::{history_routes, parse_key};
