// Copyright 2026 Modmount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fs::{self, FileType},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::defs;

/// Mount decision for one path element. The variants are ordered by
/// precedence: on a name collision the higher status wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// Placeholder reflected from the mirror inside a skeleton.
    Dummy,
    /// Intermediate directory, recurse only.
    Inter,
    /// Directory replaced by a synthesised skeleton.
    Skel,
    /// Path supplied by a module, bind-mounted as a whole.
    Module,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Dir,
    Reg,
    Lnk,
}

impl EntryType {
    pub fn of(file_type: FileType) -> Option<Self> {
        if file_type.is_symlink() {
            Some(EntryType::Lnk)
        } else if file_type.is_dir() {
            Some(EntryType::Dir)
        } else if file_type.is_file() {
            Some(EntryType::Reg)
        } else {
            None
        }
    }
}

/// One element of the virtual overlay tree. The tree owns its children; the
/// path of a node is accumulated during traversal instead of being stored as
/// a parent back-reference.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub entry: EntryType,
    pub status: Status,
    /// Sentinel left at `/system/vendor` after the hoist. Never mounted.
    pub vendor: bool,
    /// Contributing module, present on `Module` nodes only.
    pub module: Option<String>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new_root<T: ToString>(name: T) -> Self {
        Node {
            name: name.to_string(),
            entry: EntryType::Dir,
            status: Status::Inter,
            vendor: false,
            module: None,
            children: Vec::new(),
        }
    }

    pub fn new_dummy<T: ToString>(name: T, entry: EntryType) -> Self {
        Node {
            name: name.to_string(),
            entry,
            status: Status::Dummy,
            vendor: false,
            module: None,
            children: Vec::new(),
        }
    }

    /// Monotonic status upgrade; never downgrades a `Module` parent.
    pub fn upgrade(&mut self, target: Status) {
        self.status = self.status.max(target);
    }

    /// Insert `child`, resolving name collisions by precedence. Equal-status
    /// `Module` collisions are last-writer-wins so a later module overrides
    /// an earlier one; equal `Inter` keeps the existing node so sibling
    /// contributions merge under one directory. Returns the index of the
    /// surviving node.
    pub fn insert(&mut self, child: Node) -> usize {
        if let Some(idx) = self.children.iter().position(|c| c.name == child.name) {
            let existing = &self.children[idx];
            let replace = child.status > existing.status
                || (child.status == existing.status && child.status == Status::Module);
            if replace {
                // The loser's subtree drops here.
                self.children[idx] = child;
            }
            idx
        } else {
            self.children.push(child);
            self.children.len() - 1
        }
    }
}

/// Root directories the overlay machinery works against. Production uses
/// [`MountEnv::from_defs`]; everything takes contract paths ("/system/...")
/// and resolves them through this so the tree logic runs against any root.
#[derive(Debug, Clone)]
pub struct MountEnv {
    pub mount_point: PathBuf,
    pub mirror_dir: PathBuf,
    pub skeleton_dir: PathBuf,
    pub live_root: PathBuf,
}

fn rel(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

impl MountEnv {
    pub fn from_defs(mount_point: &Path) -> Self {
        MountEnv {
            mount_point: mount_point.to_path_buf(),
            mirror_dir: PathBuf::from(defs::MIRR_DIR),
            skeleton_dir: PathBuf::from(defs::DUMMY_DIR),
            live_root: PathBuf::from("/"),
        }
    }

    /// The real filesystem location of a contract path.
    pub fn live(&self, path: &Path) -> PathBuf {
        self.live_root.join(rel(path))
    }

    pub fn mirror(&self, path: &Path) -> PathBuf {
        self.mirror_dir.join(rel(path))
    }

    pub fn skeleton(&self, path: &Path) -> PathBuf {
        self.skeleton_dir.join(rel(path))
    }

    /// Where a module supplies the given contract path.
    pub fn module_side(&self, module: &str, path: &Path) -> PathBuf {
        self.mount_point.join(module).join(rel(path))
    }
}

/// Walk one module's contribution under `parent_path` and graft it into
/// `parent`. `parent_path` is the contract path of `parent` ("/system" for
/// the root).
pub fn construct_tree(
    env: &MountEnv,
    module: &str,
    parent: &mut Node,
    parent_path: &Path,
) -> Result<()> {
    let source = env.module_side(module, parent_path);
    let Ok(dir) = fs::read_dir(&source) else {
        // Missing subtree aborts only this traversal.
        return Ok(());
    };

    for entry in dir.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to stat {}/{}", source.display(), name))?;
        let Some(entry_type) = EntryType::of(file_type) else {
            continue;
        };

        let candidate = parent_path.join(&name);
        let live = env.live(&candidate);

        // The parent must become a skeleton when:
        //   1. the module entry is a symlink (cannot be bind-mounted over),
        //   2. the live path does not exist yet,
        //   3. the live path is a symlink, except for /system/vendor.
        let mut clone = entry_type == EntryType::Lnk || !live.exists();
        if !clone
            && !(parent_path == Path::new("/system") && name == "vendor")
            && live
                .symlink_metadata()
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false)
        {
            clone = true;
        }

        let status = if clone {
            parent.upgrade(Status::Skel);
            Status::Module
        } else if entry_type == EntryType::Dir {
            if env
                .module_side(module, &candidate)
                .join(defs::REPLACE_DIR_FILE_NAME)
                .exists()
            {
                // Replace the whole live directory, mark as leaf.
                Status::Module
            } else {
                Status::Inter
            }
        } else {
            Status::Module
        };

        let node = Node {
            name,
            entry: entry_type,
            status,
            vendor: false,
            module: (status == Status::Module).then(|| module.to_string()),
            children: Vec::new(),
        };

        let idx = parent.insert(node);
        let winner = &mut parent.children[idx];
        if matches!(winner.status, Status::Skel | Status::Inter) {
            construct_tree(env, module, winner, &candidate)?;
        }
    }

    Ok(())
}

/// Detach the vendor subtree from the `/system` root, leaving a sentinel in
/// its slot. The detached subtree becomes an independent root named
/// `/vendor`, mounted after the system tree.
pub fn hoist_vendor(sys_root: &mut Node, separate_vendor: bool) -> Option<Node> {
    let idx = sys_root.children.iter().position(|c| c.name == "vendor")?;

    let sentinel = Node {
        name: "vendor".to_string(),
        entry: if separate_vendor {
            EntryType::Lnk
        } else {
            EntryType::Dir
        },
        status: Status::Inter,
        vendor: true,
        module: None,
        children: Vec::new(),
    };

    let mut ven_root = std::mem::replace(&mut sys_root.children[idx], sentinel);
    ven_root.name = "/vendor".to_string();
    Some(ven_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs::File;
    use std::os::unix::fs::symlink;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("modmount-node-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn env_at(root: &Path) -> MountEnv {
        MountEnv {
            mount_point: root.join("img"),
            mirror_dir: root.join("mirror"),
            skeleton_dir: root.join("dummy"),
            live_root: root.join("live"),
        }
    }

    fn put_file(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(path).unwrap();
    }

    fn build(env: &MountEnv, modules: &[&str]) -> Node {
        let mut root = Node::new_root("/system");
        for m in modules {
            construct_tree(env, m, &mut root, Path::new("/system")).unwrap();
        }
        root
    }

    fn child<'a>(node: &'a Node, name: &str) -> &'a Node {
        node.children
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("missing child {name}"))
    }

    fn flatten(node: &Node, prefix: &str, out: &mut BTreeMap<String, (Status, Option<String>)>) {
        let path = format!("{}/{}", prefix, node.name);
        out.insert(path.clone(), (node.status, node.module.clone()));
        for c in &node.children {
            flatten(c, &path, out);
        }
    }

    #[test]
    fn disjoint_files_share_a_skeleton() {
        let root = scratch("disjoint");
        let env = env_at(&root);
        put_file(&env.live_root.join("system/etc/hosts"));
        put_file(&env.mount_point.join("A/system/etc/a.conf"));
        put_file(&env.mount_point.join("B/system/etc/b.conf"));

        let tree = build(&env, &["A", "B"]);
        let etc = child(&tree, "etc");
        assert_eq!(etc.status, Status::Skel);
        assert_eq!(child(etc, "a.conf").status, Status::Module);
        assert_eq!(child(etc, "a.conf").module.as_deref(), Some("A"));
        assert_eq!(child(etc, "b.conf").module.as_deref(), Some("B"));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn equal_precedence_is_last_writer_wins() {
        let root = scratch("collide");
        let env = env_at(&root);
        put_file(&env.live_root.join("system/etc/hosts"));
        put_file(&env.mount_point.join("A/system/etc/hosts"));
        put_file(&env.mount_point.join("B/system/etc/hosts"));

        let tree = build(&env, &["A", "B"]);
        let hosts = child(child(&tree, "etc"), "hosts");
        assert_eq!(hosts.status, Status::Module);
        assert_eq!(hosts.module.as_deref(), Some("B"));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn replace_directory_becomes_a_leaf() {
        let root = scratch("replace");
        let env = env_at(&root);
        put_file(&env.live_root.join("system/app/Foo/Foo.apk"));
        put_file(&env.mount_point.join("A/system/app/Foo/.replace"));
        put_file(&env.mount_point.join("A/system/app/Foo/Foo.apk"));

        let tree = build(&env, &["A"]);
        let foo = child(child(&tree, "app"), "Foo");
        assert_eq!(foo.status, Status::Module);
        assert!(foo.children.is_empty());
        // The containing directory needs no skeleton for a plain override.
        assert_eq!(child(&tree, "app").status, Status::Inter);

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn module_symlink_forces_skeleton() {
        let root = scratch("symlink");
        let env = env_at(&root);
        put_file(&env.live_root.join("system/bin/sh"));
        let bin = env.mount_point.join("A/system/bin");
        fs::create_dir_all(&bin).unwrap();
        symlink("sh", bin.join("foo")).unwrap();

        let tree = build(&env, &["A"]);
        let bin_node = child(&tree, "bin");
        assert_eq!(bin_node.status, Status::Skel);
        let foo = child(bin_node, "foo");
        assert_eq!(foo.status, Status::Module);
        assert_eq!(foo.entry, EntryType::Lnk);

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn directory_with_replace_beats_plain_file() {
        let root = scratch("dirwins");
        let env = env_at(&root);
        put_file(&env.live_root.join("system/app/Foo/Foo.apk"));
        put_file(&env.mount_point.join("A/system/app/Foo/.replace"));
        put_file(&env.mount_point.join("A/system/app/Foo/Foo.apk"));
        // B carries a stray file at the same path; both are Module status, so
        // the later writer wins the slot.
        put_file(&env.mount_point.join("B/system/app/Foo"));

        let tree = build(&env, &["B", "A"]);
        let foo = child(child(&tree, "app"), "Foo");
        assert_eq!(foo.entry, EntryType::Dir);
        assert_eq!(foo.module.as_deref(), Some("A"));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn vendor_hoist_swaps_in_a_sentinel() {
        let root = scratch("vendor");
        let env = env_at(&root);
        fs::create_dir_all(env.live_root.join("vendor/lib")).unwrap();
        fs::create_dir_all(env.live_root.join("system")).unwrap();
        symlink("../vendor", env.live_root.join("system/vendor")).unwrap();
        put_file(&env.mount_point.join("A/system/vendor/lib/x.so"));

        let mut tree = build(&env, &["A"]);
        let ven = hoist_vendor(&mut tree, true).expect("vendor subtree present");

        let sentinel = child(&tree, "vendor");
        assert!(sentinel.vendor);
        assert_eq!(sentinel.entry, EntryType::Lnk);
        assert!(sentinel.children.is_empty());

        assert_eq!(ven.name, "/vendor");
        let lib = child(&ven, "lib");
        assert_eq!(lib.status, Status::Skel);
        assert_eq!(child(lib, "x.so").module.as_deref(), Some("A"));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn rebuild_is_deterministic() {
        let root = scratch("determinism");
        let env = env_at(&root);
        put_file(&env.live_root.join("system/etc/hosts"));
        put_file(&env.live_root.join("system/bin/sh"));
        put_file(&env.mount_point.join("A/system/etc/hosts"));
        put_file(&env.mount_point.join("A/system/bin/tool"));
        put_file(&env.mount_point.join("B/system/etc/hosts"));
        put_file(&env.mount_point.join("B/system/etc/extra.conf"));

        let mut first = BTreeMap::new();
        let mut second = BTreeMap::new();
        flatten(&build(&env, &["A", "B"]), "", &mut first);
        flatten(&build(&env, &["A", "B"]), "", &mut second);
        assert_eq!(first, second);

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn skeletons_are_reachable_through_inter_chains() {
        let root = scratch("reach");
        let env = env_at(&root);
        put_file(&env.live_root.join("system/usr/share/zoneinfo/tzdata"));
        put_file(&env.mount_point.join("A/system/usr/share/zoneinfo/extra"));

        let tree = build(&env, &["A"]);

        fn check(node: &Node, ancestors_ok: bool) {
            if node.status == Status::Skel {
                assert!(ancestors_ok, "skeleton {} behind a non-traversable node", node.name);
            }
            let traversable = matches!(node.status, Status::Inter | Status::Skel);
            for c in &node.children {
                check(c, ancestors_ok && traversable);
            }
        }
        check(&tree, true);

        fs::remove_dir_all(root).unwrap();
    }
}
