//! Resolves a URL path to a memory-mapped file under a resource root.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

/// A file resolved and mapped read-only, ready to be sliced into a response body.
#[derive(Debug)]
pub struct MappedFile {
    pub mmap: Arc<Mmap>,
    pub content_type: &'static str,
}

/// Resource root every request path is resolved against.
#[derive(Clone)]
pub struct Resources {
    root: Arc<PathBuf>,
}

impl Resources {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    /// Maps `/` to `index.html` and rejects any path containing a `..` component, returning
    /// `NotFound` rather than letting the lookup escape `root`.
    pub fn resolve(&self, url_path: &str) -> io::Result<MappedFile> {
        let relative = if url_path == "/" || url_path.is_empty() {
            "index.html"
        } else {
            url_path.trim_start_matches('/')
        };

        let candidate = Path::new(relative);
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(io::Error::new(io::ErrorKind::NotFound, "path traversal rejected"));
        }

        let full_path = self.root.join(candidate);
        let file = File::open(&full_path)?;
        // SAFETY: the file is opened read-only from a resource tree the process controls; callers
        // must not mutate it concurrently out from under the mapping.
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(MappedFile {
            mmap: Arc::new(mmap),
            content_type: content_type_for(&full_path),
        })
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("reactord-resource-test-{name}"));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    #[test]
    fn resolves_index_for_root_path() {
        let dir = scratch_dir("index");
        std::fs::write(dir.join("index.html"), b"<html></html>").unwrap();
        let resources = Resources::new(dir);
        let mapped = resources.resolve("/").unwrap();
        assert_eq!(&mapped.mmap[..], b"<html></html>");
        assert_eq!(mapped.content_type, "text/html; charset=utf-8");
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let dir = scratch_dir("traversal");
        let resources = Resources::new(dir);
        let err = resources.resolve("/../etc/passwd").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = scratch_dir("missing");
        let resources = Resources::new(dir);
        let err = resources.resolve("/nope.html").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn picks_content_type_from_extension() {
        let dir = scratch_dir("content-type");
        let mut f = File::create(dir.join("styles.css")).unwrap();
        f.write_all(b"body {}").unwrap();
        let resources = Resources::new(dir);
        let mapped = resources.resolve("/styles.css").unwrap();
        assert_eq!(mapped.content_type, "text/css; charset=utf-8");
    }
}
