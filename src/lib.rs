//! prforge turns feedback posts into pull requests.
//!
//! A job clones the organization's repository, lets a language model edit
//! the checkout through a small set of path-guarded tools, commits the
//! result and opens a pull request, persisting its status and a progress
//! log at every step.

pub mod config;
pub mod errors;
pub mod git;
pub mod llm;
pub mod logging;
pub mod providers;
pub mod store;
pub mod tools;
pub mod util;
pub mod worker;
