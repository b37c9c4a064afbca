pub mod auth_handlers;
pub mod content;
pub mod fs_handlers;
pub mod health_handlers;
pub mod key_handlers;
pub mod object_handlers;
pub mod share_handlers;
pub mod stats_handlers;
pub mod trash_handlers;
