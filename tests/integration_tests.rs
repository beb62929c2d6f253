//! Integration tests for the prforge CLI.
//!
//! Every test works in its own temporary directory with its own database;
//! nothing here touches the network.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const MASTER_KEY: &str = "test-master-key-0123456789abcdef-0123";

/// A prforge command rooted in `dir`, isolated from the caller's env.
fn prforge(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("prforge");
    cmd.current_dir(dir.path())
        .env_remove("PRFORGE_MASTER_KEY")
        .env_remove("PRFORGE_DB")
        .env_remove("RUST_LOG")
        .env("PRFORGE_WORK_DIR", dir.path().join("work"));
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).unwrap().trim().to_string()
}

fn add_post(dir: &TempDir) -> String {
    stdout_of(prforge(dir).args([
        "post",
        "add",
        "--org",
        "org-1",
        "--title",
        "Add dark mode toggle",
        "--description",
        "Users want a dark theme.",
    ]))
}

fn create_job(dir: &TempDir, post_id: &str) -> String {
    stdout_of(prforge(dir).args([
        "job",
        "create",
        "--org",
        "org-1",
        "--post",
        post_id,
        "--provider",
        "anthropic",
    ]))
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        prforge(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("job"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        prforge(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_providers_lists_auth_types() {
        let dir = TempDir::new().unwrap();
        prforge(&dir)
            .arg("providers")
            .assert()
            .success()
            .stdout(predicate::str::contains("anthropic"))
            .stdout(predicate::str::is_match(r"codex\s+oauth").unwrap())
            .stdout(predicate::str::is_match(r"openai\s+api_key").unwrap());
    }

    #[test]
    fn test_invalid_config_file_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "[worker\nmax_steps = ").unwrap();
        prforge(&dir)
            .args(["--config", "bad.toml", "providers"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Jobs
// =============================================================================

mod jobs {
    use super::*;

    #[test]
    fn test_create_and_show_job() {
        let dir = TempDir::new().unwrap();
        let post_id = add_post(&dir);
        let job_id = create_job(&dir, &post_id);
        assert!(!job_id.is_empty());

        let shown = stdout_of(prforge(&dir).args(["job", "show", &job_id]));
        let json: serde_json::Value = serde_json::from_str(&shown).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["post_id"], post_id.as_str());
        assert_eq!(json["provider_id"], "anthropic");
        assert!(dir.path().join(".prforge/worker.db").exists());
    }

    #[test]
    fn test_cancel_is_terminal() {
        let dir = TempDir::new().unwrap();
        let post_id = add_post(&dir);
        let job_id = create_job(&dir, &post_id);

        prforge(&dir)
            .args(["job", "cancel", &job_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("cancelled"));
        prforge(&dir)
            .args(["job", "cancel", &job_id])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid status transition"));

        let shown = stdout_of(prforge(&dir).args(["job", "show", &job_id]));
        assert!(shown.contains("\"cancelled\""));
    }

    #[test]
    fn test_show_unknown_job_fails() {
        let dir = TempDir::new().unwrap();
        prforge(&dir)
            .args(["job", "show", "does-not-exist"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Job does-not-exist not found"));
    }

    #[test]
    fn test_run_without_github_token_fails_the_job() {
        let dir = TempDir::new().unwrap();
        let post_id = add_post(&dir);
        let job_id = create_job(&dir, &post_id);

        prforge(&dir)
            .args(["job", "run", &job_id])
            .assert()
            .failure()
            .stderr(predicate::str::contains("GitHub token not configured"));

        let shown = stdout_of(prforge(&dir).args(["job", "show", &job_id]));
        let json: serde_json::Value = serde_json::from_str(&shown).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_message"], "GitHub token not configured");
        assert!(!dir.path().join("work").join(&job_id).exists());

        // A finished job is not run again.
        prforge(&dir)
            .args(["job", "run", &job_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Job is failed"));
    }

    #[test]
    fn test_run_with_missing_api_key_names_the_provider() {
        let dir = TempDir::new().unwrap();
        let post_id = add_post(&dir);
        let job_id = create_job(&dir, &post_id);
        prforge(&dir)
            .env("PRFORGE_MASTER_KEY", MASTER_KEY)
            .args(["secret", "set-github-token", "--org", "org-1"])
            .write_stdin("ghs_example\n")
            .assert()
            .success();

        prforge(&dir)
            .env("PRFORGE_MASTER_KEY", MASTER_KEY)
            .args(["job", "run", &job_id])
            .assert()
            .failure()
            .stderr(predicate::str::contains(
                "API key for provider anthropic not configured",
            ));
    }
}

// =============================================================================
// Repository settings and secrets
// =============================================================================

mod settings {
    use super::*;

    #[test]
    fn test_repo_set_accepts_urls() {
        let dir = TempDir::new().unwrap();
        prforge(&dir)
            .args([
                "repo",
                "set",
                "--org",
                "org-1",
                "--repo",
                "https://github.com/acme/app.git",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("acme/app (main)"));
    }

    #[test]
    fn test_repo_set_rejects_malformed_names() {
        let dir = TempDir::new().unwrap();
        prforge(&dir)
            .args(["repo", "set", "--org", "org-1", "--repo", "just-a-name"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("expected owner/name"));
    }

    #[test]
    fn test_secrets_require_master_key() {
        let dir = TempDir::new().unwrap();
        prforge(&dir)
            .args(["secret", "set-github-token", "--org", "org-1"])
            .write_stdin("ghp_abc\n")
            .assert()
            .failure()
            .stderr(predicate::str::contains("PRFORGE_MASTER_KEY"));
    }

    #[test]
    fn test_short_master_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        prforge(&dir)
            .env("PRFORGE_MASTER_KEY", "short")
            .args(["secret", "set-api-key", "--org", "org-1", "--provider", "openai"])
            .write_stdin("sk-abc\n")
            .assert()
            .failure()
            .stderr(predicate::str::contains("PRFORGE_MASTER_KEY"));
    }

    #[test]
    fn test_secrets_are_not_stored_in_plaintext() {
        let dir = TempDir::new().unwrap();
        prforge(&dir)
            .env("PRFORGE_MASTER_KEY", MASTER_KEY)
            .args(["secret", "set-api-key", "--org", "org-1", "--provider", "anthropic"])
            .write_stdin("sk-ant-very-secret\n")
            .assert()
            .success();
        prforge(&dir)
            .env("PRFORGE_MASTER_KEY", MASTER_KEY)
            .args([
                "secret",
                "set-oauth",
                "--org",
                "org-1",
                "--provider",
                "codex",
                "--expires-at",
                "2030-01-01T00:00:00Z",
            ])
            .write_stdin("access-token-value\nrefresh-token-value\n")
            .assert()
            .success();

        let db = std::fs::read(dir.path().join(".prforge/worker.db")).unwrap();
        let contains = |needle: &[u8]| db.windows(needle.len()).any(|w| w == needle);
        assert!(!contains(b"sk-ant-very-secret"));
        assert!(!contains(b"access-token-value"));
    }
}
