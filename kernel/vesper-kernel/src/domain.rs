// SPDX-License-Identifier: MPL-2.0

//! Hooks for the resource-domain controller.
//!
//! The controller itself is an external collaborator; the core only
//! promises to announce every process creation and exit to whatever is
//! registered here.

use spin::Once;

use crate::{prelude::*, process::Process};

/// The controller interface the core calls out to.
pub trait ResourceDomain: Send + Sync {
    /// A process came into existence.
    fn attach(&self, process: &Arc<Process>);

    /// A process is going away.
    fn detach(&self, process: &Arc<Process>);
}

static CONTROLLER: Once<&'static dyn ResourceDomain> = Once::new();

/// Registers the resource-domain controller. At most one may register.
pub fn set_controller(controller: &'static dyn ResourceDomain) {
    CONTROLLER.call_once(|| controller);
}

pub(crate) fn attach(process: &Arc<Process>) {
    if let Some(controller) = CONTROLLER.get() {
        controller.attach(process);
    }
}

pub(crate) fn detach(process: &Arc<Process>) {
    if let Some(controller) = CONTROLLER.get() {
        controller.detach(process);
    }
}
