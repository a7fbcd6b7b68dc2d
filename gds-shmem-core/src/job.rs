//! `JobTracker`: the process-private handle owning the (up to) two segments
//! associated with one namespace.

use crate::error::Result;
use crate::header::Role;
use crate::segment::Segment;

/// Per-(tracker, role) status. Lives in process-private memory -- unlike
/// the segment it describes, it is never written into the shared mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
  /// A mapping exists for this role.
  pub attached: bool,
  /// The header has been initialized (creator) or its pointers installed
  /// (client); safe to share/read.
  pub ready_for_use: bool,
  /// This process must destroy (unlink) the backing file on teardown.
  pub release: bool,
}

fn role_index(role: Role) -> usize {
  match role {
    Role::Job => 0,
    Role::Modex => 1,
    Role::Invalid => unreachable!("Invalid is never used to index a tracker"),
  }
}

/// Owns both segments (job, modex) for one namespace.
pub struct JobTracker {
  pub nsid: String,
  segments: [Option<Segment>; 2],
  flags: [StatusFlags; 2],
}

impl JobTracker {
  pub fn new(nsid: impl Into<String>) -> Self {
    Self {
      nsid: nsid.into(),
      segments: [None, None],
      flags: [StatusFlags::default(), StatusFlags::default()],
    }
  }

  pub fn segment(&self, role: Role) -> Option<&Segment> {
    self.segments[role_index(role)].as_ref()
  }

  pub fn flags(&self, role: Role) -> StatusFlags {
    self.flags[role_index(role)]
  }

  pub fn is_ready(&self, role: Role) -> bool {
    self.flags(role).ready_for_use
  }

  /// Installs a freshly created segment, latching the RELEASE flag since
  /// this process is the creator.
  pub fn install_created(&mut self, role: Role, segment: Segment) {
    let idx = role_index(role);
    self.flags[idx] = StatusFlags { attached: true, ready_for_use: false, release: true };
    self.segments[idx] = Some(segment);
  }

  /// Installs a segment this process attached to but did not create.
  pub fn install_attached(&mut self, role: Role, segment: Segment) {
    let idx = role_index(role);
    self.flags[idx] = StatusFlags { attached: true, ready_for_use: false, release: false };
    self.segments[idx] = Some(segment);
  }

  /// Marks a role's segment ready for use (header initialized or client
  /// pointers installed).
  pub fn mark_ready(&mut self, role: Role) {
    self.flags[role_index(role)].ready_for_use = true;
  }

  /// Unmaps `role`'s segment without destroying it, clearing ATTACHED. The
  /// tracker keeps owning the `Segment` (and its RELEASE responsibility), so
  /// normal teardown via `Drop` still destroys and unlinks the backing file
  /// afterward. Used to hand a just-created segment's address off to a
  /// genuinely separate attaching process.
  pub fn detach_mapping(&mut self, role: Role) -> Result<()> {
    let idx = role_index(role);
    if let Some(segment) = self.segments[idx].as_mut() {
      segment.unmap_in_place()?;
      self.flags[idx].attached = false;
    }
    Ok(())
  }
}

impl Drop for JobTracker {
  fn drop(&mut self) {
    for role in [Role::Job, Role::Modex] {
      let idx = role_index(role);
      let Some(segment) = self.segments[idx].take() else {
        continue;
      };
      let flags = std::mem::take(&mut self.flags[idx]);
      let outcome: Result<()> = if flags.release {
        log::info!(
          "releasing {} segment for namespace '{}': size={} path={:?}",
          role,
          self.nsid,
          segment.size,
          segment.backing_path
        );
        segment.destroy()
      } else {
        segment.detach()
      };
      if let Err(e) = outcome {
        log::warn!("failed to release {} segment for namespace '{}': {e}", role, self.nsid);
      }
    }
  }
}
