//! Test utilities for Hangar crates.
//!
//! Fixtures here build plugin directories, archives and local git
//! repositories on disk so tests never need the network.

use serde_yaml::{Mapping, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Creates a temporary directory that is cleaned up on drop.
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Write `body` to `path` and mark it executable.
pub fn write_executable(path: impl AsRef<Path>, body: &str) -> PathBuf {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, body).expect("Failed to write script");
    set_mode(path, 0o755);
    path.to_path_buf()
}

/// Create a do-nothing executable called `name` inside `dir`, for
/// satisfying system dependency lookups.
pub fn fake_binary(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    write_executable(dir.as_ref().join(name), "#!/bin/sh\nexit 0\n")
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("Failed to chmod");
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

/// Builder for an on-disk plugin directory.
#[derive(Debug, Clone)]
pub struct PluginFixture {
    name: String,
    fields: Mapping,
    files: Vec<(PathBuf, String, bool)>,
    descriptor: DescriptorMode,
}

#[derive(Debug, Clone)]
enum DescriptorMode {
    Generated,
    Raw(String),
    Absent,
}

impl PluginFixture {
    /// A minimal valid plugin.
    pub fn new(name: &str) -> Self {
        let mut fields = Mapping::new();
        fields.insert("name".into(), name.into());
        fields.insert("version".into(), "1.0.0".into());
        fields.insert("description".into(), format!("{} test plugin", name).into());
        fields.insert("type".into(), "utility".into());
        Self {
            name: name.to_string(),
            fields,
            files: Vec::new(),
            descriptor: DescriptorMode::Generated,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set an arbitrary descriptor field.
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Remove a descriptor field.
    pub fn without_field(mut self, key: &str) -> Self {
        self.fields.remove(key);
        self
    }

    pub fn version(self, version: &str) -> Self {
        self.field("version", version)
    }

    pub fn tags(self, tags: &[&str]) -> Self {
        self.field("tags", strings(tags))
    }

    pub fn system_deps(self, deps: &[&str]) -> Self {
        self.field("dependencies", strings(deps))
    }

    pub fn plugin_deps(self, deps: &[&str]) -> Self {
        self.field("plugin_dependencies", strings(deps))
    }

    pub fn platforms(self, platforms: &[&str]) -> Self {
        self.field("platforms", strings(platforms))
    }

    /// Declare a command backed by an executable script at `entrypoint`.
    pub fn command(mut self, name: &str, entrypoint: &str) -> Self {
        let mut command = Mapping::new();
        command.insert("name".into(), name.into());
        command.insert("description".into(), format!("{} command", name).into());
        command.insert("entrypoint".into(), entrypoint.into());

        let key: Value = "commands".into();
        let mut commands = match self.fields.remove(&key) {
            Some(Value::Sequence(seq)) => seq,
            _ => Vec::new(),
        };
        commands.push(Value::Mapping(command));
        self.fields.insert(key, Value::Sequence(commands));

        let body = format!("#!/bin/sh\necho {} \"$@\"\n", name);
        self.script(entrypoint, &body)
    }

    /// Declare an init/cleanup/main entrypoint script.
    pub fn entrypoint(mut self, kind: &str, path: &str, body: &str) -> Self {
        let key: Value = "entrypoints".into();
        let mut entrypoints = match self.fields.remove(&key) {
            Some(Value::Mapping(map)) => map,
            _ => Mapping::new(),
        };
        entrypoints.insert(kind.into(), path.into());
        self.fields.insert(key, Value::Mapping(entrypoints));
        self.script(path, body)
    }

    /// Add an executable hook at the conventional `hooks/<phase>` location.
    pub fn hook(self, phase: &str, body: &str) -> Self {
        self.script(&format!("hooks/{}", phase), body)
    }

    /// Add an executable file.
    pub fn script(mut self, rel: &str, body: &str) -> Self {
        self.files.push((PathBuf::from(rel), body.to_string(), true));
        self
    }

    /// Add a plain file.
    pub fn file(mut self, rel: &str, contents: &str) -> Self {
        self.files.push((PathBuf::from(rel), contents.to_string(), false));
        self
    }

    /// Write this text as `plugin.yaml` instead of the generated descriptor.
    pub fn raw_descriptor(mut self, text: &str) -> Self {
        self.descriptor = DescriptorMode::Raw(text.to_string());
        self
    }

    /// Do not write `plugin.yaml` at all.
    pub fn without_descriptor(mut self) -> Self {
        self.descriptor = DescriptorMode::Absent;
        self
    }

    /// The generated descriptor as a YAML mapping.
    pub fn descriptor_value(&self) -> Mapping {
        self.fields.clone()
    }

    /// Write the plugin's files directly into `dir`.
    pub fn write_into(&self, dir: impl AsRef<Path>) -> PathBuf {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).expect("Failed to create plugin dir");

        match &self.descriptor {
            DescriptorMode::Generated => {
                let yaml = serde_yaml::to_string(&self.fields).expect("Failed to render descriptor");
                fs::write(dir.join("plugin.yaml"), yaml).expect("Failed to write descriptor");
            }
            DescriptorMode::Raw(text) => {
                fs::write(dir.join("plugin.yaml"), text).expect("Failed to write descriptor");
            }
            DescriptorMode::Absent => {}
        }

        for (rel, contents, executable) in &self.files {
            let path = dir.join(rel);
            if *executable {
                write_executable(&path, contents);
            } else {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).expect("Failed to create parent dir");
                }
                fs::write(&path, contents).expect("Failed to write file");
            }
        }

        dir.to_path_buf()
    }

    /// Write the plugin into `parent/<name>`.
    pub fn write_under(&self, parent: impl AsRef<Path>) -> PathBuf {
        self.write_into(parent.as_ref().join(&self.name))
    }
}

fn strings(items: &[&str]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::from(*s)).collect())
}

/// Pack `src` into a gzipped tarball, optionally nested under `wrapper/`.
pub fn tar_gz(src: impl AsRef<Path>, archive: impl AsRef<Path>, wrapper: Option<&str>) -> PathBuf {
    let archive = archive.as_ref();
    let file = File::create(archive).expect("Failed to create archive");
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_dir_all(wrapper.unwrap_or(""), src.as_ref())
        .expect("Failed to append directory");
    builder
        .into_inner()
        .expect("Failed to finish tar")
        .finish()
        .expect("Failed to finish gzip");
    archive.to_path_buf()
}

/// Pack `src` into a zip archive, optionally nested under `wrapper/`.
pub fn zip_dir(src: impl AsRef<Path>, archive: impl AsRef<Path>, wrapper: Option<&str>) -> PathBuf {
    let src = src.as_ref();
    let archive = archive.as_ref();
    let file = File::create(archive).expect("Failed to create archive");
    let mut writer = zip::ZipWriter::new(file);
    let prefix = wrapper.map(|w| format!("{}/", w)).unwrap_or_default();

    if !prefix.is_empty() {
        writer
            .add_directory(prefix.clone(), zip::write::FileOptions::default())
            .expect("Failed to add wrapper");
    }

    for entry in walkdir::WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.expect("Failed to walk source");
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("Entry outside source")
            .to_string_lossy()
            .replace('\\', "/");
        let name = format!("{}{}", prefix, rel);
        let mode = file_mode(entry.path());
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(mode);

        if entry.file_type().is_dir() {
            writer
                .add_directory(format!("{}/", name), options)
                .expect("Failed to add directory");
        } else {
            writer.start_file(name, options).expect("Failed to start file");
            let contents = fs::read(entry.path()).expect("Failed to read file");
            writer.write_all(&contents).expect("Failed to write file");
        }
    }

    writer.finish().expect("Failed to finish zip");
    archive.to_path_buf()
}

#[cfg(unix)]
fn file_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o777)
        .unwrap_or(0o644)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> u32 {
    0o644
}

/// Initialize a git repository at `dir` and commit everything in it.
pub fn git_init_commit(dir: impl AsRef<Path>, message: &str) -> git2::Repository {
    let repo = git2::Repository::init(dir.as_ref()).expect("Failed to init repo");
    git_commit_all(&repo, message);
    repo
}

/// Stage every file in the work tree and commit on top of HEAD.
pub fn git_commit_all(repo: &git2::Repository, message: &str) -> git2::Oid {
    let mut index = repo.index().expect("Failed to open index");
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .expect("Failed to stage files");
    index.update_all(["*"].iter(), None).expect("Failed to stage removals");
    index.write().expect("Failed to write index");

    let tree_id = index.write_tree().expect("Failed to write tree");
    let tree = repo.find_tree(tree_id).expect("Failed to find tree");
    let sig = git2::Signature::now("Hangar Tests", "tests@hangar.invalid")
        .expect("Failed to build signature");
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .expect("Failed to commit")
}

/// Assert that a Result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
}

/// Assert that a Result is Err and return the error.
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match $expr {
            Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
            Err(e) => e,
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_creation() {
        let dir = temp_dir();
        assert!(dir.path().exists());
        assert!(dir.path().is_dir());
    }

    #[test]
    fn test_plugin_fixture_writes_descriptor_and_scripts() {
        let dir = temp_dir();
        let plugin = PluginFixture::new("tool-a")
            .plugin_deps(&["tool-b"])
            .command("hello", "bin/hello")
            .hook("pre-install", "#!/bin/sh\nexit 0\n")
            .file("README.md", "# tool-a\n")
            .write_under(dir.path());

        assert_eq!(plugin, dir.path().join("tool-a"));
        let descriptor: Value =
            serde_yaml::from_str(&fs::read_to_string(plugin.join("plugin.yaml")).unwrap()).unwrap();
        assert_eq!(descriptor["name"], Value::from("tool-a"));
        assert_eq!(descriptor["plugin_dependencies"][0], Value::from("tool-b"));
        assert_eq!(descriptor["commands"][0]["entrypoint"], Value::from("bin/hello"));
        assert!(plugin.join("hooks/pre-install").is_file());
        assert!(plugin.join("README.md").is_file());

        #[cfg(unix)]
        assert_eq!(file_mode(&plugin.join("bin/hello")) & 0o111, 0o111);
    }

    #[test]
    fn test_archives_keep_wrapper() {
        let dir = temp_dir();
        let src = PluginFixture::new("sample").write_under(dir.path().join("src"));

        let tgz = tar_gz(&src, dir.path().join("sample.tar.gz"), Some("sample-v1"));
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(File::open(tgz).unwrap()));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().any(|n| n == "sample-v1/plugin.yaml"));

        let zip_path = zip_dir(&src, dir.path().join("sample.zip"), Some("sample-v1"));
        let zip = zip::ZipArchive::new(File::open(zip_path).unwrap()).unwrap();
        assert!(zip.file_names().any(|n| n == "sample-v1/plugin.yaml"));
    }

    #[test]
    fn test_git_fixture_commits() {
        let dir = temp_dir();
        PluginFixture::new("git-extras").write_under(dir.path());
        let repo = git_init_commit(dir.path(), "initial");
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message(), Some("initial"));
        assert!(head.tree().unwrap().get_name("git-extras").is_some());
    }
}
