// SPDX-License-Identifier: MPL-2.0

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering::Relaxed};

use id_alloc::IdAlloc;
use spin::Once;

use super::TrapFrame;
use crate::{prelude::*, sync::SpinLock, Error};

/// The number of handler-assignable interrupt vectors. Vectors 0..32 are
/// CPU exceptions and the topmost ones carry the fixed IPI vectors.
const NR_IRQ_LINES: usize = 256;

pub type IrqCallbackFunction = dyn Fn(&TrapFrame) + Sync + Send + 'static;

static IRQ_ALLOCATOR: Once<SpinLock<IdAlloc>> = Once::new();
static IRQ_LIST: Once<Vec<SystemIrqLine>> = Once::new();

pub(crate) fn init() {
    IRQ_LIST.call_once(|| {
        let mut list = Vec::with_capacity(NR_IRQ_LINES);
        for irq_num in 0..NR_IRQ_LINES {
            list.push(SystemIrqLine {
                irq_num: irq_num as u8,
                callback_list: SpinLock::new(Vec::new()),
            });
        }
        list
    });
    IRQ_ALLOCATOR.call_once(|| {
        let mut allocator = IdAlloc::with_capacity(NR_IRQ_LINES);
        // CPU exceptions and the frame-reserved IPI vectors are never
        // handed out.
        for e in 0..32 {
            allocator.alloc_specific(e);
        }
        allocator.alloc_specific(crate::arch::IpiVector::TlbShootdown as usize);
        allocator.alloc_specific(crate::arch::IpiVector::Reschedule as usize);
        SpinLock::new(allocator)
    });
}

/// Dispatches a taken interrupt to the registered callbacks. Called from
/// the arch entry stubs.
pub fn dispatch(frame: &TrapFrame) {
    let irq = &IRQ_LIST.get().unwrap()[frame.trap_num as usize];
    for callback in irq.callback_list.lock().iter() {
        (callback.function)(frame);
    }
}

#[allow(dead_code)]
struct SystemIrqLine {
    irq_num: u8,
    callback_list: SpinLock<Vec<CallbackElement>>,
}

struct CallbackElement {
    function: alloc::boxed::Box<IrqCallbackFunction>,
    id: usize,
}

/// An Interrupt ReQuest (IRQ) line. One can use [`alloc`] or
/// [`alloc_specific`] to get a specific IRQ line.
///
/// Callbacks registered on the line are unregistered automatically when
/// the handle is dropped.
///
/// [`alloc`]: IrqLine::alloc
/// [`alloc_specific`]: IrqLine::alloc_specific
#[derive(Debug)]
#[must_use]
pub struct IrqLine {
    irq_num: u8,
    callbacks: Vec<IrqCallbackHandle>,
}

impl IrqLine {
    pub fn alloc_specific(irq_num: u8) -> Result<Self> {
        IRQ_ALLOCATOR
            .get()
            .unwrap()
            .lock_irq_disabled()
            .alloc_specific(irq_num as usize)
            .map(|_| Self::new(irq_num))
            .ok_or(Error::NotEnoughResources)
    }

    pub fn alloc() -> Result<Self> {
        let Some(irq_num) = IRQ_ALLOCATOR.get().unwrap().lock_irq_disabled().alloc() else {
            return Err(Error::NotEnoughResources);
        };
        Ok(Self::new(irq_num as u8))
    }

    fn new(irq_num: u8) -> Self {
        Self {
            irq_num,
            callbacks: Vec::new(),
        }
    }

    /// Gets the IRQ number.
    pub fn num(&self) -> u8 {
        self.irq_num
    }

    /// Registers a callback that will be invoked when the IRQ is active.
    ///
    /// For each IRQ line, multiple callbacks may be registered.
    pub fn on_active<F>(&mut self, callback: F)
    where
        F: Fn(&TrapFrame) + Sync + Send + 'static,
    {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);

        let id = NEXT_ID.fetch_add(1, Relaxed) as usize;
        IRQ_LIST.get().unwrap()[self.irq_num as usize]
            .callback_list
            .lock_irq_disabled()
            .push(CallbackElement {
                function: alloc::boxed::Box::new(callback),
                id,
            });
        self.callbacks.push(IrqCallbackHandle {
            irq_num: self.irq_num,
            id,
        });
    }
}

impl Drop for IrqLine {
    fn drop(&mut self) {
        self.callbacks.clear();
        IRQ_ALLOCATOR
            .get()
            .unwrap()
            .lock_irq_disabled()
            .free(self.irq_num as usize);
    }
}

/// The handle to a registered callback, unregistering on drop.
#[derive(Debug)]
pub struct IrqCallbackHandle {
    irq_num: u8,
    id: usize,
}

impl Drop for IrqCallbackHandle {
    fn drop(&mut self) {
        let mut list = IRQ_LIST.get().unwrap()[self.irq_num as usize]
            .callback_list
            .lock_irq_disabled();
        list.retain(|element| element.id != self.id);
    }
}
