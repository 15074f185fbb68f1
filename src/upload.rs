use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

// Stores uploaded files under a single directory, keyed by a generated
// name. Callers keep the returned name as the reference they persist.
// Uploads arrive fully buffered, so the write is a single synchronous call.
pub struct FileUpload {
    dir: PathBuf,
}

impl FileUpload {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileUpload { dir: dir.into() }
    }

    // Generates a random unique filename preserving the original extension,
    // creates the directory if needed, and writes the bytes.
    pub fn save(&self, original_name: &str, bytes: &[u8]) -> io::Result<String> {
        let name = match Path::new(original_name).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };

        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(&name), bytes)?;

        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_upload_dir() -> PathBuf {
        std::env::temp_dir().join(format!("shop-api-uploads-{}", Uuid::new_v4()))
    }

    #[test]
    fn identical_original_names_never_collide() {
        let dir = temp_upload_dir();
        let uploads = FileUpload::new(dir.clone());

        let first = uploads.save("photo.png", b"first").unwrap();
        let second = uploads.save("photo.png", b"second").unwrap();

        assert_ne!(first, second);
        assert!(first.ends_with(".png"));
        assert!(second.ends_with(".png"));
        assert_eq!(fs::read(dir.join(&first)).unwrap(), b"first");
        assert_eq!(fs::read(dir.join(&second)).unwrap(), b"second");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn name_without_extension_stays_bare() {
        let dir = temp_upload_dir();
        let uploads = FileUpload::new(dir.clone());

        let stored = uploads.save("avatar", b"bytes").unwrap();
        assert!(!stored.contains('.'));
        assert_eq!(fs::read(dir.join(&stored)).unwrap(), b"bytes");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn creates_missing_directory() {
        let dir = temp_upload_dir().join("nested");
        let uploads = FileUpload::new(dir.clone());

        let stored = uploads.save("doc.jpeg", b"x").unwrap();
        assert!(dir.join(&stored).exists());

        fs::remove_dir_all(dir.parent().unwrap()).unwrap();
    }
}
