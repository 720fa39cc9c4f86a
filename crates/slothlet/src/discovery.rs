// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Directory discovery and classification - the L1 layer.
//!
//! Walks one directory level at a time, classifies entries into module
//! files and subfolders, and decides per folder which file (if any) inlines
//! into the folder's own node ("smart flattening"):
//!
//! 1. a single module file whose sanitized name equals the folder's mount
//!    segment inlines into the folder (no `config.config` stutter);
//! 2. a file sanitizing to `addapi` always inlines, with siblings exposed
//!    alongside under their own names;
//! 3. with siblings present, a mount-matching file still inlines and the
//!    siblings become children;
//! 4. otherwise every file becomes a child and subfolders recurse.
//!
//! The same rules apply during recursion (a folder `x` containing a file
//! `x` collapses one level) and to both the primary load and `add_api`.
//! Hidden entries are skipped; two entries claiming the same sanitized
//! segment are a fatal classification error.

use crate::loader::DecoderSet;
use crate::sanitize::{segment, SanitizeRules};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Segment that always inlines, regardless of the mount name.
pub const ADDAPI_SEGMENT: &str = "addapi";

/// One module file discovered inside a folder.
#[derive(Debug, Clone)]
pub struct FileNode {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Sanitized segment the file mounts under.
    pub segment: String,
}

/// One discovered folder, classified.
#[derive(Debug, Clone)]
pub struct DirNode {
    /// Absolute path of the folder.
    pub dir: PathBuf,
    /// Sanitized mount segment of this folder ("" only for a root whose
    /// name sanitizes to nothing).
    pub segment: String,
    /// File inlined into this folder's own node, if the flattening rules
    /// selected one.
    pub inline: Option<FileNode>,
    /// Files exposed as children under their own segments.
    pub files: Vec<FileNode>,
    /// Subfolders, classified recursively.
    pub children: Vec<DirNode>,
}

impl DirNode {
    /// True when nothing module-like was found beneath this folder.
    pub fn is_empty(&self) -> bool {
        self.inline.is_none() && self.files.is_empty() && self.children.is_empty()
    }
}

/// Options steering a discovery walk.
#[derive(Debug, Clone)]
pub struct DiscoverOptions<'a> {
    /// Sanitization rules for file and folder names.
    pub sanitize: &'a SanitizeRules,
    /// Decoders deciding which files count as modules.
    pub decoders: &'a DecoderSet,
    /// Maximum folder-nesting depth; `None` is unlimited.
    pub api_depth: Option<usize>,
}

/// Discover and classify `dir`, mounted under `mount_segment`.
///
/// `mount_segment` is the sanitized segment the folder will occupy in the
/// bound tree (the last segment of an `add_api` path, or the root
/// directory's own sanitized name for the primary load).
pub fn discover(
    dir: &Path,
    mount_segment: &str,
    options: &DiscoverOptions<'_>,
) -> crate::Result<DirNode> {
    if !dir.is_dir() {
        return Err(crate::Error::Access(format!(
            "Cannot access folder '{}'",
            dir.display()
        )));
    }
    discover_level(dir, mount_segment, options, 0)
}

fn discover_level(
    dir: &Path,
    mount_segment: &str,
    options: &DiscoverOptions<'_>,
    depth: usize,
) -> crate::Result<DirNode> {
    let mut files: Vec<FileNode> = Vec::new();
    let mut subdirs: Vec<(PathBuf, String)> = Vec::new();
    // segment -> origin, for collision reporting
    let mut claimed: BTreeMap<String, PathBuf> = BTreeMap::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| {
            crate::Error::Access(format!("Cannot access folder '{}': {e}", dir.display()))
        })?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }

        if entry.file_type().is_dir() {
            let seg = segment(&name, options.sanitize);
            if seg.is_empty() {
                continue;
            }
            claim(&mut claimed, &seg, entry.path())?;
            subdirs.push((entry.into_path(), seg));
        } else if entry.file_type().is_file() && options.decoders.recognizes(entry.path()) {
            let stem = entry
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let seg = segment(stem, options.sanitize);
            if seg.is_empty() {
                continue;
            }
            claim(&mut claimed, &seg, entry.path())?;
            files.push(FileNode {
                path: entry.into_path(),
                segment: seg,
            });
        }
    }

    // Flattening decision: an addapi file beats a mount-name match.
    let inline_idx = files
        .iter()
        .position(|f| f.segment == ADDAPI_SEGMENT)
        .or_else(|| files.iter().position(|f| f.segment == mount_segment));
    let inline = inline_idx.map(|i| files.remove(i));

    if let Some(ref f) = inline {
        tracing::debug!(
            folder = %dir.display(),
            file = %f.path.display(),
            "inlining module file into its folder node"
        );
    }

    let mut children = Vec::new();
    let descend = options.api_depth.map_or(true, |limit| depth < limit);
    if descend {
        for (subdir, seg) in subdirs {
            let child = discover_level(&subdir, &seg, options, depth + 1)?;
            if !child.is_empty() {
                children.push(child);
            }
        }
    } else if !subdirs.is_empty() {
        tracing::debug!(
            folder = %dir.display(),
            depth,
            "apiDepth limit reached; subfolders not materialized"
        );
    }

    Ok(DirNode {
        dir: dir.to_path_buf(),
        segment: mount_segment.to_string(),
        inline,
        files,
        children,
    })
}

fn claim(
    claimed: &mut BTreeMap<String, PathBuf>,
    seg: &str,
    path: &Path,
) -> crate::Result<()> {
    if let Some(existing) = claimed.get(seg) {
        return Err(crate::Error::Validation(format!(
            "duplicate segment '{seg}': '{}' collides with '{}'",
            path.display(),
            existing.display()
        )));
    }
    claimed.insert(seg.to_string(), path.to_path_buf());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    fn options<'a>(
        sanitize: &'a SanitizeRules,
        decoders: &'a DecoderSet,
    ) -> DiscoverOptions<'a> {
        DiscoverOptions {
            sanitize,
            decoders,
            api_depth: None,
        }
    }

    fn touch_json(dir: &Path, name: &str) {
        fs::write(dir.join(name), "{}").unwrap();
    }

    #[test]
    fn test_single_matching_file_inlines() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tmp.path().join("config");
        fs::create_dir(&config).unwrap();
        touch_json(&config, "config.json");

        let rules = SanitizeRules::default();
        let decoders = DecoderSet::default();
        let node = discover(&config, "config", &options(&rules, &decoders)).unwrap();

        assert!(node.inline.is_some());
        assert!(node.files.is_empty());
    }

    #[test]
    fn test_matching_file_with_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let math = tmp.path().join("math");
        fs::create_dir(&math).unwrap();
        touch_json(&math, "math.json");
        touch_json(&math, "helpers.json");

        let rules = SanitizeRules::default();
        let decoders = DecoderSet::default();
        let node = discover(&math, "math", &options(&rules, &decoders)).unwrap();

        assert_eq!(node.inline.as_ref().unwrap().segment, "math");
        assert_eq!(node.files.len(), 1);
        assert_eq!(node.files[0].segment, "helpers");
    }

    #[test]
    fn test_no_match_exposes_all_files() {
        let tmp = tempfile::tempdir().unwrap();
        let util = tmp.path().join("util");
        fs::create_dir(&util).unwrap();
        touch_json(&util, "strings.json");
        touch_json(&util, "numbers.json");

        let rules = SanitizeRules::default();
        let decoders = DecoderSet::default();
        let node = discover(&util, "util", &options(&rules, &decoders)).unwrap();

        assert!(node.inline.is_none());
        assert_eq!(node.files.len(), 2);
    }

    #[test]
    fn test_addapi_file_beats_mount_match() {
        let tmp = tempfile::tempdir().unwrap();
        let plug = tmp.path().join("plug");
        fs::create_dir(&plug).unwrap();
        touch_json(&plug, "addapi.json");
        touch_json(&plug, "plug.json");

        let rules = SanitizeRules::default();
        let decoders = DecoderSet::default();
        let node = discover(&plug, "plug", &options(&rules, &decoders)).unwrap();

        assert_eq!(node.inline.as_ref().unwrap().segment, "addapi");
        assert_eq!(node.files.len(), 1, "the mount-named file stays a sibling");
        assert_eq!(node.files[0].segment, "plug");
    }

    #[test]
    fn test_folder_file_name_match_in_recursion() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let nested = root.join("tools");
        fs::create_dir_all(&nested).unwrap();
        touch_json(&nested, "tools.json");
        touch_json(&nested, "extra.json");

        let rules = SanitizeRules::default();
        let decoders = DecoderSet::default();
        let node = discover(&root, "root", &options(&rules, &decoders)).unwrap();

        assert_eq!(node.children.len(), 1);
        let tools = &node.children[0];
        assert_eq!(tools.segment, "tools");
        assert_eq!(tools.inline.as_ref().unwrap().segment, "tools");
        assert_eq!(tools.files.len(), 1);
    }

    #[test]
    fn test_hidden_entries_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("api");
        fs::create_dir(&dir).unwrap();
        touch_json(&dir, ".secret.json");
        fs::create_dir(dir.join(".git")).unwrap();
        touch_json(&dir, "visible.json");

        let rules = SanitizeRules::default();
        let decoders = DecoderSet::default();
        let node = discover(&dir, "api", &options(&rules, &decoders)).unwrap();

        assert_eq!(node.files.len(), 1);
        assert_eq!(node.files[0].segment, "visible");
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_duplicate_segments_are_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("api");
        fs::create_dir(&dir).unwrap();
        touch_json(&dir, "my-mod.json");
        touch_json(&dir, "my_mod.json");

        let rules = SanitizeRules::default();
        let decoders = DecoderSet::default();
        let err = discover(&dir, "api", &options(&rules, &decoders)).unwrap_err();
        assert!(err.to_string().contains("duplicate segment"));
    }

    #[test]
    fn test_api_depth_limits_recursion() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let l1 = root.join("one");
        let l2 = l1.join("two");
        fs::create_dir_all(&l2).unwrap();
        touch_json(&l1, "a.json");
        touch_json(&l2, "b.json");

        let rules = SanitizeRules::default();
        let decoders = DecoderSet::default();
        let opts = DiscoverOptions {
            sanitize: &rules,
            decoders: &decoders,
            api_depth: Some(1),
        };
        let node = discover(&root, "root", &opts).unwrap();

        assert_eq!(node.children.len(), 1);
        assert!(node.children[0].children.is_empty(), "depth 2 is cut off");
    }

    #[test]
    fn test_missing_directory_is_access_error() {
        let rules = SanitizeRules::default();
        let decoders = DecoderSet::default();
        let err = discover(
            Path::new("/nonexistent/slothlet/api"),
            "api",
            &options(&rules, &decoders),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Cannot access folder"));
    }

    #[test]
    fn test_non_module_files_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("api");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("README.md"), "# docs").unwrap();
        touch_json(&dir, "real.json");

        let rules = SanitizeRules::default();
        let decoders = DecoderSet::default();
        let node = discover(&dir, "api", &options(&rules, &decoders)).unwrap();
        assert_eq!(node.files.len(), 1);
    }
}
