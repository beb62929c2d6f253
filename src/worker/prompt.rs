//! Prompt, commit and pull-request text for a job.

use prforge_common::FeedbackPost;

pub const SYSTEM_PROMPT: &str = "You are an autonomous software engineer working inside a git checkout of the user's repository. \
Use the provided tools to explore the codebase, then implement the requested change. \
All paths are relative to the repository root. Follow the project's existing conventions, \
keep the change focused, and do not commit or push: the changes are committed for you when you finish.";

const INSTRUCTIONS: &str = "\
## Instructions

1. Explore the repository structure to understand how it is organized.
2. Find the files relevant to this request and read them before editing.
3. Implement the change with minimal, focused edits that match the existing style.
4. If the project has tests, add or update tests for the new behavior.
5. When you are done, reply with a short summary of what you changed.";

/// User prompt for the implementing phase.
pub fn build_task_prompt(post: &FeedbackPost, additional_context: Option<&str>) -> String {
    let mut prompt = format!("# Feature request: {}\n\n", post.title);
    if !post.description.trim().is_empty() {
        prompt.push_str(&format!("## Description\n\n{}\n\n", post.description.trim()));
    }
    if let Some(context) = additional_context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("## Additional context\n\n{}\n\n", context.trim()));
    }
    prompt.push_str(INSTRUCTIONS);
    prompt
}

pub fn commit_message(post: &FeedbackPost) -> String {
    format!(
        "feat: {}\n\nImplemented automatically from feedback post {}.",
        post.title, post.id
    )
}

pub fn pull_request_title(post: &FeedbackPost) -> String {
    format!("feat: {}", post.title)
}

pub fn pull_request_body(post: &FeedbackPost, additional_context: Option<&str>, provider_id: &str) -> String {
    let mut body = format!("## Summary\n\nAutomated implementation for: **{}**\n\n", post.title);
    if !post.description.trim().is_empty() {
        body.push_str(&format!("### Feedback\n\n{}\n\n", post.description.trim()));
    }
    if let Some(context) = additional_context.filter(|c| !c.trim().is_empty()) {
        body.push_str(&format!("### Additional context\n\n{}\n\n", context.trim()));
    }
    body.push_str(&format!(
        "---\n*Generated by prforge using the `{}` provider. Please review carefully before merging.*",
        provider_id
    ));
    body
}
