//! `prforge post`

use std::sync::Arc;

use anyhow::{Result, bail};
use prforge::store::SqliteStore;
use prforge_common::FeedbackPost;

use super::super::PostCommands;

pub async fn cmd_post(store: Arc<SqliteStore>, command: PostCommands) -> Result<()> {
    match command {
        PostCommands::Add {
            org,
            title,
            description,
        } => {
            if title.trim().is_empty() {
                bail!("Post title must not be empty");
            }
            let id = uuid::Uuid::new_v4().to_string();
            store
                .add_post(
                    &org,
                    FeedbackPost {
                        id: id.clone(),
                        title,
                        description,
                    },
                )
                .await?;
            println!("{}", id);
        }
    }
    Ok(())
}
