use archive_catalog::catalog::Catalog;
use archive_catalog::config::CatalogConfig;
use archive_catalog::registry::FilePointer;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A library directory, a database directory and a manifest naming the
/// books added so far. Keys use the `{{Library}}` placeholder.
#[allow(dead_code)]
pub struct CatalogFixture {
    pub dir: TempDir,
    keys: Vec<String>,
}

#[allow(dead_code)]
impl CatalogFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join("library")).unwrap();
        fs::create_dir_all(dir.path().join("db")).unwrap();
        let fixture = Self {
            dir,
            keys: Vec::new(),
        };
        fixture.write_manifest();
        fixture
    }

    pub fn library(&self) -> PathBuf {
        self.dir.path().join("library")
    }

    pub fn database(&self) -> PathBuf {
        self.dir.path().join("db")
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// A directory "archive" holding one file per page name.
    pub fn add_book(&mut self, rel: &str, pages: &[&str]) -> String {
        let book = self.library().join(rel);
        fs::create_dir_all(&book).unwrap();
        for page in pages {
            fs::write(book.join(page), page.as_bytes()).unwrap();
        }
        self.push_key(rel)
    }

    /// A `.cbt` (plain tar) archive holding one entry per page name.
    pub fn add_tar_book(&mut self, rel: &str, pages: &[&str]) -> String {
        let path = self.library().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut builder = tar::Builder::new(fs::File::create(&path).unwrap());
        for page in pages {
            let mut header = tar::Header::new_gnu();
            header.set_size(page.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, page, page.as_bytes()).unwrap();
        }
        builder.finish().unwrap();
        self.push_key(rel)
    }

    /// A manifest entry whose archive does not exist.
    pub fn add_missing(&mut self, rel: &str) -> String {
        self.push_key(rel)
    }

    fn push_key(&mut self, rel: &str) -> String {
        let key = format!("{{{{Library}}}}/{rel}");
        self.keys.push(key.clone());
        self.write_manifest();
        key
    }

    pub fn write_manifest(&self) {
        let mut body = self.keys.join("\n");
        body.push('\n');
        fs::write(self.manifest(), body).unwrap();
    }

    pub fn manifest(&self) -> PathBuf {
        self.database().join("files.txt")
    }

    pub fn pointer(&self, key: &str) -> FilePointer {
        FilePointer::new(key, &self.config().meta_root()).unwrap()
    }

    pub fn write_static(&self, key: &str, body: serde_json::Value) {
        let path = self.pointer(key).static_meta_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_vec_pretty(&body).unwrap()).unwrap();
    }

    pub fn config(&self) -> CatalogConfig {
        CatalogConfig::new(self.database())
            .with_dir_var("Library", self.library().to_string_lossy())
    }

    /// Write `catalog.toml` next to the database and return its path.
    pub fn write_config(&self) -> PathBuf {
        let path = self.dir.path().join("catalog.toml");
        fs::write(&path, toml::to_string(&self.config()).unwrap()).unwrap();
        path
    }

    pub fn open(&self) -> Catalog {
        Catalog::open(self.config()).expect("open catalog")
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}
