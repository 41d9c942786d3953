// SPDX-License-Identifier: MPL-2.0

use vesper_frame::mm::sim;

use super::{
    clone::{copy_process, root_pid_ns},
    exit::exit_process,
    process_table,
    signal::SIGCHLD,
    wait::{reap_zombie, WaitFilter},
    CloneFlags, Process, ProcessState,
};
use crate::prelude::*;

fn setup() {
    sim::init();
    crate::process::init();
}

/// The one true root process shared by all tests.
fn anchor() -> Arc<Process> {
    static ANCHOR: spin::Once<Arc<Process>> = spin::Once::new();
    setup();
    ANCHOR
        .call_once(|| copy_process(CloneFlags::empty(), None, None, None).unwrap())
        .clone()
}

/// Each test gets its own PID namespace so reparenting stays local to
/// the test's "init".
fn spawn_root() -> Arc<Process> {
    copy_process(CloneFlags::CLONE_NEWPID, Some(&anchor()), None, None).unwrap()
}

fn spawn_child(parent: &Arc<Process>) -> Arc<Process> {
    copy_process(CloneFlags::empty(), Some(parent), None, None).unwrap()
}

#[test]
fn exit_reparents_children_to_the_reaper() {
    setup();
    let init = spawn_root();
    let parent = spawn_child(&init);
    let children: Vec<_> = (0..3).map(|_| spawn_child(&parent)).collect();
    for child in &children {
        assert_eq!(child.parent().unwrap().pid(), parent.pid());
    }

    exit_process(&parent, 0);
    assert_eq!(parent.state(), ProcessState::Zombie);

    // Every orphan now points at the namespace reaper.
    for child in &children {
        assert_eq!(child.parent().unwrap().pid(), init.pid());
        assert!(init.children().lock().contains_key(&child.pid()));
    }

    // The dying parent signalled its own parent with SIGCHLD.
    assert_eq!(init.sig().dequeue().unwrap().num, SIGCHLD);

    // Reap the zombie and then each orphan as it dies.
    let (reaped, _) = reap_zombie(&init, WaitFilter::Child(parent.pid()))
        .unwrap()
        .unwrap();
    assert_eq!(reaped, parent.pid());
    assert!(process_table::get(parent.pid()).is_none());

    for child in &children {
        exit_process(child, 7);
        let (pid, code) = reap_zombie(&init, WaitFilter::AnyChild).unwrap().unwrap();
        assert_eq!(pid, child.pid());
        assert_eq!(code, 7);
    }
    assert!(matches!(
        reap_zombie(&init, WaitFilter::AnyChild),
        Err(_) | Ok(None)
    ));
}

#[test]
fn wait_sees_exit_code_and_releases_the_zombie() {
    setup();
    let init = spawn_root();
    let child = spawn_child(&init);
    let pid = child.pid();

    // Nothing to reap while the child lives.
    assert!(reap_zombie(&init, WaitFilter::Child(pid)).unwrap().is_none());

    exit_process(&child, 42);
    // The exit released the address space immediately.
    assert!(child.vmar().is_none());
    assert!(child.files().is_none());

    let (reaped, code) = reap_zombie(&init, WaitFilter::Child(pid)).unwrap().unwrap();
    assert_eq!((reaped, code), (pid, 42));
    // Waiting again reports no such child.
    assert!(reap_zombie(&init, WaitFilter::Child(pid)).is_err());
}

#[test]
fn clone_shares_or_copies_resources_by_flag() {
    setup();
    let init = spawn_root();

    let shared = copy_process(
        CloneFlags::CLONE_VM | CloneFlags::CLONE_FILES | CloneFlags::CLONE_FS,
        Some(&init),
        None,
        None,
    )
    .unwrap();
    assert!(Arc::ptr_eq(
        &init.vmar().unwrap(),
        &shared.vmar().unwrap()
    ));
    assert!(Arc::ptr_eq(
        &init.files().unwrap(),
        &shared.files().unwrap()
    ));

    let copied = copy_process(CloneFlags::empty(), Some(&init), None, None).unwrap();
    assert!(!Arc::ptr_eq(
        &init.vmar().unwrap(),
        &copied.vmar().unwrap()
    ));
    assert!(!Arc::ptr_eq(
        &init.files().unwrap(),
        &copied.files().unwrap()
    ));

    exit_process(&shared, 0);
    exit_process(&copied, 0);
    reap_zombie(&init, WaitFilter::AnyChild).unwrap();
    reap_zombie(&init, WaitFilter::AnyChild).unwrap();
}

#[test]
fn pid_namespaces_nest_and_scope_identifiers() {
    setup();
    let init = spawn_root();
    let nested = copy_process(CloneFlags::CLONE_NEWPID, Some(&init), None, None).unwrap();

    assert_eq!(nested.pid_ns().level(), init.pid_ns().level() + 1);
    // The nested namespace numbers its init from 1, while the global
    // identity stays unique.
    assert_eq!(nested.pid_in_ns(), 1);
    assert_ne!(nested.pid(), nested.pid_in_ns());
    assert!(process_table::get(nested.pid()).is_some());
    // The first process of a fresh namespace is its reaper.
    assert_eq!(nested.pid_ns().reaper().unwrap().pid(), nested.pid());
    assert_eq!(root_pid_ns().level(), 0);

    // A grandchild inside the namespace reparents to the nested reaper,
    // not to the global init.
    let inner_child = copy_process(CloneFlags::empty(), Some(&nested), None, None).unwrap();
    let orphan = copy_process(CloneFlags::empty(), Some(&inner_child), None, None).unwrap();
    exit_process(&inner_child, 0);
    assert_eq!(orphan.parent().unwrap().pid(), nested.pid());

    exit_process(&orphan, 0);
    reap_zombie(&nested, WaitFilter::AnyChild).unwrap();
    reap_zombie(&nested, WaitFilter::AnyChild).unwrap();
    exit_process(&nested, 0);
    reap_zombie(&init, WaitFilter::AnyChild).unwrap();
}
