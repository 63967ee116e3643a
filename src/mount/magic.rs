use std::{
    fs::{self, File},
    path::Path,
};

use anyhow::{Context, Result};

use crate::{
    mount::node::{EntryType, MountEnv, Node, Status},
    utils::{bind_mount, clone_attr, clone_symlink},
};

/// Dispatch one tree node: bind a module path, synthesise a skeleton, or
/// recurse. `parent_path` is the contract path of the node's parent (empty
/// for roots). With `strict` unset, individual mount failures are logged and
/// the walk continues.
pub fn magic_mount(
    env: &MountEnv,
    node: &mut Node,
    parent_path: &Path,
    strict: bool,
) -> Result<()> {
    // The vendor sentinel only preserves tree shape.
    if node.vendor {
        return Ok(());
    }

    let path = parent_path.join(&node.name);
    match node.status {
        Status::Module => {
            let module = node
                .module
                .as_deref()
                .with_context(|| format!("module node {} without an owner", path.display()))?;
            let source = env.module_side(module, &path);
            if let Err(e) = bind_mount(&source, &env.live(&path)) {
                if strict {
                    return Err(e);
                }
                log::error!("magic mount {}: {:#}", path.display(), e);
            }
        }
        Status::Skel => clone_skeleton(env, node, parent_path, strict)?,
        Status::Inter => {
            for i in 0..node.children.len() {
                magic_mount(env, &mut node.children[i], &path, strict)?;
            }
        }
        // Dummies are only reached through the materialiser.
        Status::Dummy => {}
    }

    Ok(())
}

/// Materialise a mixed directory: reflect every mirror entry as a dummy,
/// build the skeleton under the staging tree, bind it over the live path,
/// then mount each child from its true source. A node entered for vendor
/// containment (status below `Skel`) is populated without covering the live
/// path.
pub fn clone_skeleton(
    env: &MountEnv,
    node: &mut Node,
    parent_path: &Path,
    strict: bool,
) -> Result<()> {
    let full_path = parent_path.join(&node.name);

    if let Ok(dir) = fs::read_dir(env.mirror(&full_path)) {
        for entry in dir.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if let Some(entry_type) = EntryType::of(file_type) {
                node.insert(Node::new_dummy(
                    entry.file_name().to_string_lossy(),
                    entry_type,
                ));
            }
        }
    }

    let skel = env.skeleton(&full_path);
    fs::create_dir_all(&skel)
        .with_context(|| format!("Failed to create skeleton {}", skel.display()))?;
    // The mirror keeps the original attributes even once an ancestor
    // skeleton shadows the live path.
    let attr_src = match env.mirror(&full_path) {
        m if m.exists() => m,
        _ => env.live(&full_path),
    };
    if let Err(e) = clone_attr(&attr_src, &skel) {
        log::warn!("skeleton attrs {}: {:#}", full_path.display(), e);
    }

    // The skeleton covers the live directory before any child is mounted,
    // otherwise the child mounts would land in the underlying directory and
    // stay invisible.
    if node.status == Status::Skel {
        bind_mount(&skel, env.live(&full_path))?;
    }

    for i in 0..node.children.len() {
        let name = node.children[i].name.clone();
        if let Err(e) = materialise_child(env, &full_path, &skel, &mut node.children[i], strict) {
            if strict {
                return Err(e);
            }
            log::error!("skeleton {}/{}: {:#}", full_path.display(), name, e);
        }
    }

    Ok(())
}

fn materialise_child(
    env: &MountEnv,
    full_path: &Path,
    skel: &Path,
    child: &mut Node,
    strict: bool,
) -> Result<()> {
    let slot = skel.join(&child.name);
    match child.entry {
        EntryType::Dir => {
            if !slot.is_dir() {
                fs::create_dir(&slot)
                    .with_context(|| format!("Failed to create {}", slot.display()))?;
            }
        }
        EntryType::Reg => {
            File::create(&slot).with_context(|| format!("Failed to touch {}", slot.display()))?;
        }
        // Symlinks are copied with their attributes below.
        EntryType::Lnk => {}
    }

    if child.vendor {
        if child.entry == EntryType::Lnk {
            // Bridge to the separate vendor partition: the live
            // /system/vendor becomes a copy of the mirror's symlink.
            clone_symlink(
                env.mirror(Path::new("/system/vendor")),
                env.live(Path::new("/system/vendor")),
            )?;
        }
        return Ok(());
    }

    let source = match child.status {
        Status::Module => {
            let module = child
                .module
                .as_deref()
                .with_context(|| format!("module node {} without an owner", child.name))?;
            env.module_side(module, &full_path.join(&child.name))
        }
        Status::Skel | Status::Inter => {
            // Deeper mixed directory: no mount here, populate it in place.
            return clone_skeleton(env, child, full_path, strict);
        }
        Status::Dummy => env.mirror(full_path).join(&child.name),
    };

    if child.entry == EntryType::Lnk {
        clone_symlink(&source, &slot)?;
    } else {
        bind_mount(&source, env.live(&full_path.join(&child.name)))?;
    }

    Ok(())
}
