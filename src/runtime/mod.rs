//! A reference implementation of the `__sable_*` runtime ABI. Compiled
//! code calls this `extern "C"` surface directly; nothing else in the
//! pipeline does, except the tests that exercise the backend lowering
//! contract end-to-end against a real (if minimal) runtime instead of
//! only asserting on `LoweredModule` shapes.
//!
//! Where reference descriptions of this surface disagree, this module
//! picks one shape and is authoritative throughout the crate.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};

pub const PAGE_SIZE: u32 = 65536;

pub const TRAP_MEMORY_OOB: u32 = 1;
pub const TRAP_TABLE_OOB: u32 = 2;
pub const TRAP_TABLE_NULL: u32 = 3;

/// A trap always aborts execution; typed as diverging rather than the
/// bare `fn(u32)` the C surface implies, since nothing downstream of a
/// trap call is reachable.
pub type TrapHandler = extern "C" fn(u32) -> !;
pub type FuncPtr = *const c_void;

pub struct Instance {
    memory_metadata: *const c_void,
    table_metadata: *const c_void,
    global_metadata: *const c_void,
    function_metadata: *const c_void,
    trap_handler: TrapHandler,
    memories: Vec<*mut Memory>,
    tables: Vec<*mut Table>,
    globals: Vec<*mut Global>,
}

impl Instance {
    fn trap(&self, code: u32) -> ! {
        (self.trap_handler)(code)
    }
}

pub struct Memory {
    pages: u32,
    max_pages: u32,
    data: Vec<u8>,
}

#[derive(Clone)]
pub struct Table {
    #[allow(dead_code)]
    max_entries: u32,
    entries: Vec<Option<(CString, FuncPtr)>>,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union GlobalSlot {
    pub i32_: i32,
    pub i64_: i64,
    pub f32_: u32,
    pub f64_: u64,
}

pub struct Global {
    pub type_char: u8,
    pub slot: GlobalSlot,
}

/// # Safety
/// The four metadata pointers must outlive the returned instance.
#[no_mangle]
pub unsafe extern "C" fn __sable_instance_allocate(
    memory_metadata: *const c_void,
    table_metadata: *const c_void,
    global_metadata: *const c_void,
    function_metadata: *const c_void,
    trap_handler: TrapHandler,
    num_entries: u32,
) -> *mut Instance {
    let instance = Instance {
        memory_metadata,
        table_metadata,
        global_metadata,
        function_metadata,
        trap_handler,
        memories: Vec::with_capacity(num_entries as usize),
        tables: Vec::new(),
        globals: Vec::new(),
    };
    Box::into_raw(Box::new(instance))
}

/// # Safety
/// `instance` must be a pointer previously returned by
/// `__sable_instance_allocate`, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn __sable_instance_free(instance: *mut Instance) {
    if !instance.is_null() {
        drop(Box::from_raw(instance));
    }
}

#[no_mangle]
pub extern "C" fn __sable_global_allocate(type_char: u8) -> *mut Global {
    Box::into_raw(Box::new(Global { type_char, slot: GlobalSlot { i64_: 0 } }))
}

/// # Safety
/// `global` must be a pointer previously returned by
/// `__sable_global_allocate`, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn __sable_global_free(global: *mut Global) {
    if !global.is_null() {
        drop(Box::from_raw(global));
    }
}

#[no_mangle]
pub extern "C" fn __sable_memory_allocate(num_pages: u32) -> *mut Memory {
    __sable_memory_allocate_with_bound(num_pages, u32::MAX)
}

#[no_mangle]
pub extern "C" fn __sable_memory_allocate_with_bound(num_pages: u32, max: u32) -> *mut Memory {
    let memory = Memory {
        pages: num_pages,
        max_pages: max,
        data: vec![0u8; num_pages as usize * PAGE_SIZE as usize],
    };
    Box::into_raw(Box::new(memory))
}

/// # Safety
/// `memory` must be a pointer previously returned by an allocator in
/// this module, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn __sable_memory_free(memory: *mut Memory) {
    if !memory.is_null() {
        drop(Box::from_raw(memory));
    }
}

/// # Safety
/// `memory` must point at a live `Memory`.
#[no_mangle]
pub unsafe extern "C" fn __sable_memory_size(memory: *const Memory) -> u32 {
    (*memory).pages
}

/// # Safety
/// `memory` must point at a live `*mut Memory` slot.
#[no_mangle]
pub unsafe extern "C" fn __sable_memory_grow(memory: *mut *mut Memory, delta: u32) -> u32 {
    let m = &mut **memory;
    let new_pages = match m.pages.checked_add(delta) {
        Some(p) => p,
        None => return u32::MAX,
    };
    if m.max_pages != u32::MAX && new_pages > m.max_pages {
        return u32::MAX;
    }
    let old_pages = m.pages;
    m.data.resize(new_pages as usize * PAGE_SIZE as usize, 0);
    m.pages = new_pages;
    old_pages
}

/// # Safety
/// `instance` and `memory` must point at live values.
#[no_mangle]
pub unsafe extern "C" fn __sable_memory_guard(instance: *const Instance, memory: *const Memory, addr: u32) {
    let m = &*memory;
    if u64::from(addr) > m.data.len() as u64 {
        (*instance).trap(TRAP_MEMORY_OOB);
    }
}

#[no_mangle]
pub extern "C" fn __sable_table_allocate(num_entries: u32) -> *mut Table {
    __sable_table_allocate_with_bound(num_entries, u32::MAX)
}

#[no_mangle]
pub extern "C" fn __sable_table_allocate_with_bound(num_entries: u32, max: u32) -> *mut Table {
    let table = Table { max_entries: max, entries: vec![None; num_entries as usize] };
    Box::into_raw(Box::new(table))
}

/// # Safety
/// `table` must be a pointer previously returned by an allocator in
/// this module, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn __sable_table_free(table: *mut Table) {
    if !table.is_null() {
        drop(Box::from_raw(table));
    }
}

/// # Safety
/// `instance` and `table` must point at live values.
#[no_mangle]
pub unsafe extern "C" fn __sable_table_guard(instance: *const Instance, table: *const Table, idx: u32) {
    let t = &*table;
    match t.entries.get(idx as usize) {
        None => (*instance).trap(TRAP_TABLE_OOB),
        Some(None) => (*instance).trap(TRAP_TABLE_NULL),
        Some(Some(_)) => {}
    }
}

/// # Safety
/// `table` must point at a live `Table`; `type_cstr` must be a valid,
/// nul-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn __sable_table_set(
    table: *mut Table,
    idx: u32,
    func: FuncPtr,
    type_cstr: *const c_char,
) -> FuncPtr {
    let t = &mut *table;
    let signature = CStr::from_ptr(type_cstr).to_owned();
    let previous = t.entries[idx as usize].take();
    t.entries[idx as usize] = Some((signature, func));
    previous.map(|(_, f)| f).unwrap_or(std::ptr::null())
}

/// # Safety
/// `table` must point at a live `Table`.
#[no_mangle]
pub unsafe extern "C" fn __sable_table_get(table: *const Table, idx: u32) -> FuncPtr {
    (*table).entries.get(idx as usize).and_then(|e| e.as_ref()).map(|(_, f)| *f).unwrap_or(std::ptr::null())
}

/// # Safety
/// `table` must point at a live `Table`. The returned pointer is valid
/// only while the slot at `idx` remains occupied.
#[no_mangle]
pub unsafe extern "C" fn __sable_table_type(table: *const Table, idx: u32) -> *const c_char {
    match (*table).entries.get(idx as usize).and_then(|e| e.as_ref()) {
        Some((sig, _)) => sig.as_ptr(),
        None => std::ptr::null(),
    }
}

/// # Safety
/// `a` and `b` must be valid, nul-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn __sable_strcmp(a: *const c_char, b: *const c_char) -> c_int {
    let a = CStr::from_ptr(a).to_bytes();
    let b = CStr::from_ptr(b).to_bytes();
    match a.cmp(b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static LAST_TRAP: AtomicU32 = AtomicU32::new(0);

    extern "C" fn record_trap(code: u32) -> ! {
        LAST_TRAP.store(code, Ordering::SeqCst);
        panic!("trap {code}");
    }

    unsafe fn test_instance() -> *mut Instance {
        __sable_instance_allocate(
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            record_trap,
            0,
        )
    }

    #[test]
    fn memory_grows_and_reports_new_size() {
        unsafe {
            let mut memory = __sable_memory_allocate_with_bound(1, 4);
            assert_eq!(__sable_memory_size(memory), 1);
            let old = __sable_memory_grow(&mut memory, 2);
            assert_eq!(old, 1);
            assert_eq!(__sable_memory_size(memory), 3);
            __sable_memory_free(memory);
        }
    }

    #[test]
    fn memory_grow_past_the_bound_fails() {
        unsafe {
            let mut memory = __sable_memory_allocate_with_bound(3, 4);
            assert_eq!(__sable_memory_grow(&mut memory, 2), u32::MAX);
            __sable_memory_free(memory);
        }
    }

    #[test]
    fn out_of_bounds_access_traps_with_code_one() {
        unsafe {
            let instance = test_instance();
            let memory = __sable_memory_allocate(1);
            let result = std::panic::catch_unwind(|| {
                __sable_memory_guard(instance, memory, PAGE_SIZE + 1);
            });
            assert!(result.is_err());
            assert_eq!(LAST_TRAP.load(Ordering::SeqCst), TRAP_MEMORY_OOB);
            __sable_memory_free(memory);
            __sable_instance_free(instance);
        }
    }

    #[test]
    fn table_set_then_get_round_trips_the_function_pointer() {
        unsafe {
            let table = __sable_table_allocate(2);
            let sig = CString::new("II:J").unwrap();
            let marker: FuncPtr = 0x1000 as FuncPtr;
            let previous = __sable_table_set(table, 0, marker, sig.as_ptr());
            assert!(previous.is_null());
            assert_eq!(__sable_table_get(table, 0), marker);
            __sable_table_free(table);
        }
    }

    #[test]
    fn null_table_slot_traps_with_code_three() {
        unsafe {
            let instance = test_instance();
            let table = __sable_table_allocate(1);
            let result = std::panic::catch_unwind(|| {
                __sable_table_guard(instance, table, 0);
            });
            assert!(result.is_err());
            assert_eq!(LAST_TRAP.load(Ordering::SeqCst), TRAP_TABLE_NULL);
            __sable_table_free(table);
            __sable_instance_free(instance);
        }
    }

    #[test]
    fn strcmp_matches_byte_ordering() {
        unsafe {
            let a = CString::new("abc").unwrap();
            let b = CString::new("abd").unwrap();
            assert!(__sable_strcmp(a.as_ptr(), b.as_ptr()) < 0);
            assert_eq!(__sable_strcmp(a.as_ptr(), a.as_ptr()), 0);
        }
    }
}
