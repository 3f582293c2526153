//! Privilege drop: resolve `--user`/`--group` to uids/gids, `chroot`,
//! raise or clear the requested capability set, and apply the resource
//! limits (`--fd-limit-min`, `--enable-core`) that must be set before the
//! drop happens.
//!
//! Order matters and is fixed by `drop_privileges`: resource limits and
//! `chroot` happen while still root, then group before user (dropping
//! user first would forfeit the right to change group), then capabilities
//! last since `setuid` clears the ambient set on Linux.

use std::path::Path;
use std::str::FromStr;

use caps::{CapSet, Capability};
use nix::sys::resource::{setrlimit, Resource};
use nix::unistd::{chdir, chroot, setgid, setuid, Gid, Group, Uid, User};

use zorp_errors::{ZorpError, ZorpResult};

#[derive(Debug, Clone, Default)]
pub struct PrivilegeDrop {
    pub user: Option<String>,
    pub group: Option<String>,
    pub chroot_dir: Option<std::path::PathBuf>,
    pub caps: Option<String>,
    pub no_caps: bool,
    pub fd_limit_min: u64,
    pub enable_core: bool,
}

impl PrivilegeDrop {
    /// Applies resource limits, chroots, drops group then user privilege,
    /// and finally sets the capability set. Must run before any untrusted
    /// input is processed.
    pub fn apply(&self) -> ZorpResult<()> {
        self.apply_resource_limits()?;

        if let Some(dir) = &self.chroot_dir {
            chroot_to(dir)?;
        }

        let target_uid = self.user.as_deref().map(resolve_uid).transpose()?;
        let target_gid = self.group.as_deref().map(resolve_gid).transpose()?;

        if let Some(gid) = target_gid {
            setgid(gid).map_err(|e| ZorpError::config(format!("setgid failed: {e}")))?;
        }
        if let Some(uid) = target_uid {
            setuid(uid).map_err(|e| ZorpError::config(format!("setuid failed: {e}")))?;
        }

        self.apply_capabilities()?;
        Ok(())
    }

    fn apply_resource_limits(&self) -> ZorpResult<()> {
        if self.fd_limit_min > 0 {
            let (soft, hard) = nix::sys::resource::getrlimit(Resource::RLIMIT_NOFILE)
                .map_err(|e| ZorpError::config(format!("getrlimit NOFILE failed: {e}")))?;
            if soft < self.fd_limit_min {
                setrlimit(Resource::RLIMIT_NOFILE, self.fd_limit_min, hard.max(self.fd_limit_min))
                    .map_err(|e| ZorpError::config(format!("raising fd limit failed: {e}")))?;
            }
        }
        if self.enable_core {
            let (_, hard) = nix::sys::resource::getrlimit(Resource::RLIMIT_CORE)
                .map_err(|e| ZorpError::config(format!("getrlimit CORE failed: {e}")))?;
            setrlimit(Resource::RLIMIT_CORE, hard, hard)
                .map_err(|e| ZorpError::config(format!("enabling core dumps failed: {e}")))?;
        }
        Ok(())
    }

    fn apply_capabilities(&self) -> ZorpResult<()> {
        if self.no_caps {
            caps::clear(None, CapSet::Effective).map_err(|e| ZorpError::config(e.to_string()))?;
            caps::clear(None, CapSet::Permitted).map_err(|e| ZorpError::config(e.to_string()))?;
            return Ok(());
        }
        let Some(spec) = &self.caps else {
            return Ok(());
        };
        for name in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let cap = Capability::from_str(name)
                .map_err(|_| ZorpError::config(format!("unknown capability {name:?} in --caps")))?;
            caps::raise(None, CapSet::Permitted, cap).map_err(|e| ZorpError::config(e.to_string()))?;
            caps::raise(None, CapSet::Effective, cap).map_err(|e| ZorpError::config(e.to_string()))?;
        }
        Ok(())
    }
}

fn resolve_uid(user: &str) -> ZorpResult<Uid> {
    if let Ok(uid) = user.parse::<u32>() {
        return Ok(Uid::from_raw(uid));
    }
    User::from_name(user)
        .map_err(|e| ZorpError::config(format!("looking up user {user:?}: {e}")))?
        .map(|u| u.uid)
        .ok_or_else(|| ZorpError::config(format!("no such user {user:?}")))
}

fn resolve_gid(group: &str) -> ZorpResult<Gid> {
    if let Ok(gid) = group.parse::<u32>() {
        return Ok(Gid::from_raw(gid));
    }
    Group::from_name(group)
        .map_err(|e| ZorpError::config(format!("looking up group {group:?}: {e}")))?
        .map(|g| g.gid)
        .ok_or_else(|| ZorpError::config(format!("no such group {group:?}")))
}

fn chroot_to(dir: &Path) -> ZorpResult<()> {
    chroot(dir).map_err(|e| ZorpError::config(format!("chroot to {} failed: {e}", dir.display())))?;
    chdir("/").map_err(|e| ZorpError::config(format!("chdir after chroot failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_uid_resolves_without_a_passwd_lookup() {
        assert_eq!(resolve_uid("1000").unwrap(), Uid::from_raw(1000));
    }

    #[test]
    fn numeric_gid_resolves_without_a_group_lookup() {
        assert_eq!(resolve_gid("1000").unwrap(), Gid::from_raw(1000));
    }
}
