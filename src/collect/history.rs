//! Shell history aggregation across user accounts.

use std::path::Path;

use tracing::debug;

use super::CollectError;

/// History files looked for in every home directory, in this order.
pub const HISTORY_FILES: [&str; 2] = [".zsh_history", ".bash_history"];

#[derive(Debug, Default)]
pub struct HistoryReport {
    pub content: Vec<u8>,
    /// `<user>/<file>` for every history that made it into `content`.
    pub included: Vec<String>,
    /// Present but unreadable history files.
    pub skipped: usize,
}

/// Concatenate every readable history file under `users_root/*/`.
///
/// Each file is preceded by `=== <user> <file> ===` and followed by a blank line.
/// History bytes are copied as they are, invalid UTF-8 included.
/// Only failing to list `users_root` itself is an error; unreadable or missing
/// per-user files are skipped.
pub async fn aggregate(users_root: &Path) -> Result<HistoryReport, CollectError> {
    let mut entries = tokio::fs::read_dir(users_root)
        .await
        .map_err(|source| CollectError::Read {
            path: users_root.to_path_buf(),
            source,
        })?;

    let mut users = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_dir = tokio::fs::metadata(entry.path())
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    users.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            Ok(None) => break,
            Err(source) => {
                return Err(CollectError::Read {
                    path: users_root.to_path_buf(),
                    source,
                })
            }
        }
    }
    users.sort();

    let mut report = HistoryReport::default();
    for user in &users {
        for file in HISTORY_FILES {
            let path = users_root.join(user).join(file);
            if tokio::fs::symlink_metadata(&path).await.is_err() {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    report
                        .content
                        .extend_from_slice(format!("=== {} {} ===\n", user, file).as_bytes());
                    report.content.extend_from_slice(&bytes);
                    report.content.extend_from_slice(b"\n\n");
                    report.included.push(format!("{}/{}", user, file));
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable history");
                    report.skipped += 1;
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_readable_and_unreadable_users() {
        let root = tempfile::tempdir().unwrap();
        let alice = root.path().join("alice");
        let bob = root.path().join("bob");
        fs::create_dir_all(&alice).unwrap();
        fs::create_dir_all(&bob).unwrap();
        fs::write(alice.join(".zsh_history"), "ls -la\ncd /tmp\n").unwrap();
        // A directory where the file should be cannot be read, even as root.
        fs::create_dir(bob.join(".zsh_history")).unwrap();

        let report = aggregate(root.path()).await.unwrap();
        let text = String::from_utf8(report.content).unwrap();

        assert_eq!(text, "=== alice .zsh_history ===\nls -la\ncd /tmp\n\n\n");
        assert_eq!(report.included, vec!["alice/.zsh_history"]);
        assert_eq!(report.skipped, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permission_denied_history_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let carol = root.path().join("carol");
        let dave = root.path().join("dave");
        fs::create_dir_all(&carol).unwrap();
        fs::create_dir_all(&dave).unwrap();
        fs::write(carol.join(".bash_history"), "whoami\n").unwrap();
        let locked = dave.join(".bash_history");
        fs::write(&locked, "secret\n").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        if fs::read(&locked).is_ok() {
            // Running as root: permissions are not enforced.
            return;
        }

        let report = aggregate(root.path()).await.unwrap();
        let text = String::from_utf8(report.content).unwrap();
        assert!(text.contains("whoami"));
        assert!(!text.contains("secret"));
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_both_history_files_in_order_and_files_ignored() {
        let root = tempfile::tempdir().unwrap();
        let erin = root.path().join("erin");
        fs::create_dir_all(&erin).unwrap();
        fs::write(erin.join(".bash_history"), "b\n").unwrap();
        fs::write(erin.join(".zsh_history"), "z\n").unwrap();
        fs::write(root.path().join(".localized"), "").unwrap();

        let report = aggregate(root.path()).await.unwrap();
        assert_eq!(
            report.included,
            vec!["erin/.zsh_history", "erin/.bash_history"]
        );
    }

    #[tokio::test]
    async fn test_history_bytes_are_copied_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let frank = root.path().join("frank");
        fs::create_dir_all(&frank).unwrap();
        fs::write(frank.join(".zsh_history"), b": 1700000000:0;echo \xff\xfe\n").unwrap();

        let report = aggregate(root.path()).await.unwrap();
        let mut expected = b"=== frank .zsh_history ===\n".to_vec();
        expected.extend_from_slice(b": 1700000000:0;echo \xff\xfe\n\n\n");
        assert_eq!(report.content, expected);
    }

    #[tokio::test]
    async fn test_missing_users_root_is_read_error() {
        let res = aggregate(Path::new("/nonexistent/users/root")).await;
        assert!(matches!(res, Err(CollectError::Read { .. })));
    }
}
