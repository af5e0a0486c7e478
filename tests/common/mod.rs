#![allow(dead_code)]

use git_publish::config::{ConfigFile, PublishConfig};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub const SECRET: &str = "s3cret";
pub const REPO: &str = "octo/site";

/// Run git in `dir` with a fixed identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(["-c", "user.name=Fixture", "-c", "user.email=fixture@example.com"])
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("git should be installed");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare "remote" repository with a `main` branch, plus a seed clone used to
/// push new commits into it.
pub struct Fixture {
    pub tmp: TempDir,
    pub remote: PathBuf,
    pub seed: PathBuf,
    pub work_root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let remote = tmp.path().join("remote.git");
        let seed = tmp.path().join("seed");
        let work_root = tmp.path().join("work");

        git(tmp.path(), &["init", "--bare", remote.to_str().unwrap()]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        git(tmp.path(), &["init", seed.to_str().unwrap()]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);

        let fixture = Self {
            tmp,
            remote,
            seed,
            work_root,
        };
        fixture.write("README.md", "site sources\n");
        fixture.write("site/old.html", "<p>old</p>\n");
        fixture.commit_and_push("initial");
        fixture
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.seed.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.seed.join(rel)).unwrap();
    }

    /// Commit everything in the seed and push it; returns the new head.
    pub fn commit_and_push(&self, message: &str) -> String {
        git(&self.seed, &["add", "--all"]);
        git(&self.seed, &["commit", "-m", message]);
        git(&self.seed, &["push", "origin", "HEAD:refs/heads/main"]);
        git(&self.seed, &["rev-parse", "HEAD"])
    }

    pub fn remote_head(&self) -> String {
        git(&self.remote, &["rev-parse", "refs/heads/main"])
    }

    pub fn remote_file(&self, rev: &str, rel: &str) -> String {
        git(&self.remote, &["show", &format!("{}:{}", rev, rel)])
    }

    /// Config pointing at the fixture remote; `extra` is appended as TOML.
    pub fn config(&self, extra: &str) -> PublishConfig {
        let toml_str = format!(
            r#"
[server]
work_root = "{work_root}"
max_concurrent_uploads = 4

[webhook]
secret = "{SECRET}"

[repository]
full_name = "{REPO}"
remote_url = "{remote}"
prefix = "site"

[storage]
bucket = "my-bucket"

{extra}
"#,
            work_root = self.work_root.display(),
            remote = self.remote.display(),
        );
        let file: ConfigFile = toml::from_str(&toml_str).unwrap();
        PublishConfig::resolve(file, |_| None).unwrap()
    }
}

/// Push payload JSON for `head` on `main` with one commit's path lists.
pub fn push_payload(head: &str, added: &[&str], modified: &[&str], removed: &[&str]) -> String {
    serde_json::json!({
        "ref": "refs/heads/main",
        "after": head,
        "deleted": false,
        "repository": {
            "full_name": REPO,
            "owner": { "login": "octo", "email": "octo@example.com" }
        },
        "commits": [{
            "added": added,
            "modified": modified,
            "removed": removed,
        }]
    })
    .to_string()
}
