use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use uuid::Uuid;

/// Private working directory for one execution. Keyed by job id plus a
/// nanosecond tag so concurrent deliveries of the same job cannot collide.
/// Removed on drop, which runs on every exit path including timeout kills.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub async fn create(job_id: Uuid) -> anyhow::Result<Self> {
        let path = std::env::temp_dir().join(format!(
            "coderunner-{}-{}",
            job_id.as_simple(),
            now_nanos()
        ));
        tokio::fs::create_dir_all(&path)
            .await
            .context("failed to create scratch directory")?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::ScratchDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn scratch_is_removed_on_drop() {
        let scratch = ScratchDir::create(Uuid::new_v4()).await.unwrap();
        let path = scratch.path().to_path_buf();
        tokio::fs::write(scratch.file("main.cpp"), "int main(){}")
            .await
            .unwrap();
        assert!(path.exists());
        drop(scratch);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn concurrent_scratches_for_one_job_do_not_collide() {
        let id = Uuid::new_v4();
        let a = ScratchDir::create(id).await.unwrap();
        let b = ScratchDir::create(id).await.unwrap();
        assert_ne!(a.path(), b.path());
    }
}
