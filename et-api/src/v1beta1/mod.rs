mod cluster_profile;
mod clusters;
mod event_source;
mod event_trigger;

pub use cluster_profile::*;
pub use clusters::*;
pub use event_source::*;
pub use event_trigger::*;

pub const API_GROUP: &str = "lib.projectsveltos.io";
pub const API_VERSION: &str = "v1beta1";
