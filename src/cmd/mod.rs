//! CLI command implementations.
//!
//! | Module      | Commands handled |
//! |-------------|------------------|
//! | `job`       | `Job`            |
//! | `post`      | `Post`           |
//! | `repo`      | `Repo`           |
//! | `secret`    | `Secret`         |
//! | `providers` | `Providers`      |

pub mod job;
pub mod post;
pub mod providers;
pub mod repo;
pub mod secret;

pub use job::cmd_job;
pub use post::cmd_post;
pub use providers::cmd_providers;
pub use repo::cmd_repo;
pub use secret::cmd_secret;
