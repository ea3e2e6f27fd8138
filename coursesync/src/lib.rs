//! CourseSync - offline course content and background transfers for a
//! learning-management client.
//!
//! The crate is organised around one transactional [`store`]:
//!
//! - [`transfer`] moves files through a long-lived background session and
//!   keeps each item's record in step with its task.
//! - [`sync`] lets a user pick courses, tabs and files for offline use and
//!   turns the pick into a download batch.
//! - [`bulk`] runs server-side publish jobs and polls them to completion.
//! - [`api`] talks to the server; [`app`] wires everything together.
//! - [`config`] and [`logging`] cover the configuration file and tracing.

pub mod api;
pub mod app;
pub mod bulk;
pub mod config;
pub mod logging;
pub mod store;
pub mod sync;
pub mod transfer;

pub use app::{AppConfig, AppError, CourseSyncApp};
