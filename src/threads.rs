//! Cooperative guest-thread multiplexer: `clone`/`clone3`, `exit`/`exit_group`,
//! `sched_yield`, and futex wait/wake, all folded onto the single host thread that drives
//! [`crate::dispatch`]. Threads are stored in a [`slotmap::SlotMap`] owned by the table; the
//! suspended/blocked queues and the "current" pointer hold slot keys rather than references,
//! so nothing here borrows across a context switch.
//!
//! Invariant: whenever a thread other than the one created by [`ThreadTable::new`] is current,
//! the thread that was current immediately before it sits in the suspended or blocked queue —
//! the only way to become current is to be taken off one of those queues (`wakeup_next`,
//! `yield_to`, `unblock`), and that always suspends whoever was running first. This is what
//! lets [`ThreadTable::exit_current`] always find someone to resume when a non-main thread
//! exits.

use slotmap::{new_key_type, SlotMap};
use std::collections::{HashMap, VecDeque};

use crate::abi::{RETURN_REG, SP_REG, TP_REG};
use crate::cpu::Registers;
use crate::error::{Error, ExceptionKind};

new_key_type! { struct ThreadKey; }

/// `CLONE_PARENT_SETTID`: write the new tid into the parent's memory at `parent_tid_addr`.
pub const CLONE_PARENT_SETTID: u32 = 0x0010_0000;
/// `CLONE_CHILD_CLEARTID`: zero `child_tid_addr` in guest memory when this thread exits.
pub const CLONE_CHILD_CLEARTID: u32 = 0x0020_0000;
/// `CLONE_CHILD_SETTID`: write the new tid into the child's memory at `child_tid_addr`.
pub const CLONE_CHILD_SETTID: u32 = 0x0100_0000;

struct GuestThread {
    tid: i32,
    regs: Registers,
    #[allow(dead_code)]
    stack_base: u64,
    #[allow(dead_code)]
    stack_size: u64,
    clear_tid: u64,
    block_word: u32,
}

/// The result of [`ThreadTable::create`]: the new thread's guest-visible id, plus the guest
/// addresses (if any) that the caller must write the id into.
pub struct NewThread {
    pub tid: i32,
    pub set_child_tid: Option<u64>,
    pub set_parent_tid: Option<u64>,
}

/// The outcome of a thread exiting, returned by [`ThreadTable::exit_current`].
pub enum ExitOutcome {
    /// The main thread (tid 0) exited: this is a process exit, not a thread exit. No other
    /// thread is resumed; the table is left untouched for the caller to inspect if needed.
    ProcessExit,
    /// A non-main thread exited and another thread was resumed. Carries the guest address to
    /// zero (`CLONE_CHILD_CLEARTID`), if one was registered.
    ThreadExit { clear_tid: Option<u64> },
}

/// Owns every guest thread except the "live" one, whose state is the [`Registers`] the
/// dispatch loop is currently executing against.
pub struct ThreadTable {
    threads: SlotMap<ThreadKey, GuestThread>,
    by_tid: HashMap<i32, ThreadKey>,
    suspended: VecDeque<ThreadKey>,
    blocked: Vec<ThreadKey>,
    current: ThreadKey,
    thread_counter: i32,
}

impl ThreadTable {
    /// Creates the table with a single main thread (tid 0) whose stack spans
    /// `[stack_base, stack_base + stack_size)` and whose initial stack pointer is `initial_sp`.
    pub fn new(initial_sp: u64, stack_base: u64, stack_size: u64) -> Self {
        let mut threads = SlotMap::with_key();
        let mut regs = Registers::default();
        regs.set(SP_REG, initial_sp);
        let key = threads.insert(GuestThread {
            tid: 0,
            regs,
            stack_base,
            stack_size,
            clear_tid: 0,
            block_word: 0,
        });
        let mut by_tid = HashMap::new();
        by_tid.insert(0, key);
        ThreadTable {
            threads,
            by_tid,
            suspended: VecDeque::new(),
            blocked: Vec::new(),
            current: key,
            thread_counter: 0,
        }
    }

    /// The guest-visible id of the thread currently executing.
    pub fn current_tid(&self) -> i32 {
        self.threads[self.current].tid
    }

    fn key_of(&self, tid: i32) -> Option<ThreadKey> {
        self.by_tid.get(&tid).copied()
    }

    /// Creates a new thread and registers it. The thread is not yet runnable; the caller
    /// (the `clone` system-call handler) must follow up with either [`ThreadTable::schedule`]
    /// (the child runs later, after the parent yields or blocks — the usual case) or
    /// [`ThreadTable::yield_to`] (the child runs immediately, suspending the parent).
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        flags: u32,
        child_tid_addr: u64,
        parent_tid_addr: u64,
        stack_ptr: u64,
        tls: u64,
        stack_base: u64,
        stack_size: u64,
        current_regs: &Registers,
    ) -> NewThread {
        self.thread_counter += 1;
        let tid = self.thread_counter;
        // Inherit every register from the cloning thread except its own stack and TLS
        // pointer, and its return value (the caller sets that to 0 once this thread is
        // actually resumed for the first time).
        let mut regs = current_regs.clone();
        regs.set(TP_REG, tls);
        regs.set(SP_REG, stack_ptr);
        let clear_tid = if flags & CLONE_CHILD_CLEARTID != 0 {
            child_tid_addr
        } else {
            0
        };
        let key = self.threads.insert(GuestThread {
            tid,
            regs,
            stack_base,
            stack_size,
            clear_tid,
            block_word: 0,
        });
        self.by_tid.insert(tid, key);

        NewThread {
            tid,
            set_child_tid: (flags & CLONE_CHILD_SETTID != 0).then_some(child_tid_addr),
            set_parent_tid: (flags & CLONE_PARENT_SETTID != 0).then_some(parent_tid_addr),
        }
    }

    /// Makes a freshly created thread runnable by placing it at the back of the suspended
    /// queue, to be picked up the next time the current thread yields, blocks, or exits.
    pub fn schedule(&mut self, tid: i32) {
        if let Some(key) = self.key_of(tid) {
            self.suspended.push_back(key);
        }
    }

    fn suspend_current(&mut self, regs: &Registers, return_value: Option<u64>) {
        let key = self.current;
        let thread = &mut self.threads[key];
        thread.regs = regs.clone();
        if let Some(value) = return_value {
            thread.regs.set(RETURN_REG, value);
        }
        self.suspended.push_back(key);
    }

    fn resume(&mut self, key: ThreadKey, regs: &mut Registers) {
        self.current = key;
        *regs = self.threads[key].regs.clone();
    }

    /// Resumes the next suspended thread, if any. Returns whether a switch happened.
    fn wakeup_next(&mut self, regs: &mut Registers) -> bool {
        match self.suspended.pop_front() {
            Some(key) => {
                self.resume(key, regs);
                true
            }
            None => false,
        }
    }

    /// `sched_yield`: suspends the current thread and resumes the next suspended one, if any.
    /// Returns `false` (and sets the return register to 0) when there is no other runnable
    /// thread, matching the real syscall's "alone in the world" case.
    pub fn suspend_and_yield(&mut self, regs: &mut Registers) -> bool {
        if self.suspended.is_empty() {
            regs.set(RETURN_REG, 0);
            return false;
        }
        self.suspend_current(regs, Some(0));
        self.wakeup_next(regs);
        true
    }

    /// `futex(FUTEX_WAIT)`-style blocking: suspends the current thread tagged with `reason`
    /// (conventionally the futex address) and resumes the next suspended thread. Raises
    /// [`ExceptionKind::DeadlockReached`] if no other thread is runnable, since blocking here
    /// would otherwise stop the host loop forever with no way to make progress.
    pub fn block(&mut self, reason: u32, regs: &mut Registers) -> Result<(), Error> {
        if self.suspended.is_empty() {
            return Err(Error::fault(ExceptionKind::DeadlockReached));
        }
        let key = self.current;
        {
            let thread = &mut self.threads[key];
            thread.regs = regs.clone();
            thread.regs.set(RETURN_REG, reason as u64);
            thread.block_word = reason;
        }
        self.blocked.push(key);
        self.wakeup_next(regs);
        Ok(())
    }

    /// `futex(FUTEX_WAKE)`-style wake: moves every thread blocked on `reason` from the blocked
    /// set to the suspended set (they become runnable, but are not switched to immediately).
    /// Returns the number of threads woken.
    pub fn wakeup_blocked(&mut self, reason: u32) -> usize {
        let mut woken = 0;
        let mut i = 0;
        while i < self.blocked.len() {
            if self.threads[self.blocked[i]].block_word == reason {
                let key = self.blocked.remove(i);
                self.suspended.push_back(key);
                woken += 1;
            } else {
                i += 1;
            }
        }
        woken
    }

    /// Directly resumes a specific blocked thread by tid, independent of its block reason.
    /// Returns `false` (and sets the return register to `-1`) if `tid` is not currently
    /// blocked.
    pub fn unblock(&mut self, tid: i32, regs: &mut Registers) -> bool {
        let key = match self.key_of(tid) {
            Some(key) => key,
            None => {
                regs.set(RETURN_REG, (-1i64) as u64);
                return false;
            }
        };
        match self.blocked.iter().position(|&k| k == key) {
            Some(pos) => {
                self.blocked.remove(pos);
                self.suspend_current(regs, Some(0));
                self.resume(key, regs);
                true
            }
            None => {
                regs.set(RETURN_REG, (-1i64) as u64);
                false
            }
        }
    }

    /// Switches directly to thread `tid`, suspending the current thread first. Returns `false`
    /// (no switch) if `tid` does not exist or is already current; when `store_retval` is set,
    /// the current thread's future return value is written (0 on success, -1 if `tid` is
    /// unknown).
    pub fn yield_to(&mut self, tid: i32, regs: &mut Registers, store_retval: bool) -> bool {
        let next = match self.key_of(tid) {
            Some(key) => key,
            None => {
                if store_retval {
                    regs.set(RETURN_REG, (-1i64) as u64);
                }
                return false;
            }
        };
        if next == self.current {
            if store_retval {
                regs.set(RETURN_REG, 0);
            }
            return false;
        }
        self.suspend_current(regs, store_retval.then_some(0));
        if let Some(pos) = self.suspended.iter().position(|&k| k == next) {
            self.suspended.remove(pos);
        }
        self.resume(next, regs);
        true
    }

    /// Terminates the current thread. The main thread (tid 0) exiting is reported as a process
    /// exit. Any other thread is dropped and the next suspended thread is resumed — guaranteed
    /// to exist per this module's scheduling invariant (see the module doc comment).
    pub fn exit_current(&mut self, regs: &mut Registers) -> ExitOutcome {
        let key = self.current;
        let tid = self.threads[key].tid;
        if tid == 0 {
            return ExitOutcome::ProcessExit;
        }
        let clear_tid = self.threads[key].clear_tid;
        self.by_tid.remove(&tid);
        self.threads.remove(key);
        self.wakeup_next(regs);
        ExitOutcome::ThreadExit {
            clear_tid: (clear_tid != 0).then_some(clear_tid),
        }
    }

    /// Number of threads currently tracked (running, suspended, and blocked).
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ThreadTable {
        ThreadTable::new(0x8000_0000, 0x7f00_0000, 0x0010_0000)
    }

    #[test]
    fn starts_with_single_main_thread() {
        let t = table();
        assert_eq!(t.current_tid(), 0);
        assert_eq!(t.thread_count(), 1);
    }

    #[test]
    fn create_inherits_registers_except_stack_and_tls() {
        let mut t = table();
        let mut regs = Registers::default();
        regs.set(10, 0xabc);
        let new = t.create(
            CLONE_CHILD_SETTID,
            0x9000,
            0,
            0x7e00_0000,
            0x6000_0000,
            0x7d00_0000,
            0x1000,
            &regs,
        );
        assert_eq!(new.tid, 1);
        assert_eq!(new.set_child_tid, Some(0x9000));
        t.schedule(new.tid);
        assert!(t.yield_to(1, &mut regs, true));
        assert_eq!(regs.get(10), 0xabc);
        assert_eq!(regs.get(TP_REG), 0x6000_0000);
        assert_eq!(regs.get(SP_REG), 0x7e00_0000);
    }

    #[test]
    fn sched_yield_alone_returns_false() {
        let mut t = table();
        let mut regs = Registers::default();
        assert!(!t.suspend_and_yield(&mut regs));
        assert_eq!(regs.get(RETURN_REG), 0);
    }

    #[test]
    fn scheduled_child_runs_after_parent_yields() {
        let mut t = table();
        let mut regs = Registers::default();
        let new = t.create(0, 0, 0, 0x7e00_0000, 0, 0x7d00_0000, 0x1000, &regs);
        t.schedule(new.tid);
        assert!(t.suspend_and_yield(&mut regs));
        assert_eq!(t.current_tid(), 1);
    }

    #[test]
    fn futex_wait_without_other_threads_deadlocks() {
        let mut t = table();
        let mut regs = Registers::default();
        assert!(t.block(42, &mut regs).is_err());
    }

    #[test]
    fn futex_wake_makes_blocked_thread_runnable_again() {
        let mut t = table();
        let mut regs = Registers::default();
        let new = t.create(0, 0, 0, 0x7e00_0000, 0, 0x7d00_0000, 0x1000, &regs);
        t.schedule(new.tid);
        assert!(t.suspend_and_yield(&mut regs)); // thread 1 now current, thread 0 suspended
        t.block(7, &mut regs).unwrap(); // thread 1 blocks, thread 0 resumes
        assert_eq!(t.current_tid(), 0);
        assert_eq!(t.wakeup_blocked(7), 1);
        assert!(t.suspend_and_yield(&mut regs));
        assert_eq!(t.current_tid(), 1);
    }

    #[test]
    fn main_thread_exit_is_process_exit() {
        let mut t = table();
        let mut regs = Registers::default();
        assert!(matches!(t.exit_current(&mut regs), ExitOutcome::ProcessExit));
    }

    #[test]
    fn child_thread_exit_clears_tid_and_resumes_parent() {
        let mut t = table();
        let mut regs = Registers::default();
        let new = t.create(CLONE_CHILD_CLEARTID, 0x9000, 0, 0x7e00_0000, 0, 0x7d00_0000, 0x1000, &regs);
        t.schedule(new.tid);
        assert!(t.suspend_and_yield(&mut regs)); // thread 1 current, thread 0 suspended
        match t.exit_current(&mut regs) {
            ExitOutcome::ThreadExit { clear_tid } => assert_eq!(clear_tid, Some(0x9000)),
            ExitOutcome::ProcessExit => panic!("expected a thread exit"),
        }
        assert_eq!(t.current_tid(), 0);
        assert_eq!(t.thread_count(), 1);
    }
}
