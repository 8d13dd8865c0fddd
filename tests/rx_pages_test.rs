use std::collections::HashMap;

use rxpage_helper::core::memory::MemoryError;
use rxpage_helper::core::Debugger;
use rxpage_helper::debug::arch::Arch;
use rxpage_helper::debug::{Frame, ProcessMemory, RegisterValue};
use rxpage_helper::loader::SymbolInfo;
use rxpage_helper::rx_pages::{self, RxPageConfig};

const NOTIFY_ADDR: u64 = 0x5555_0000_1230;

/// Flat fake address space: page base -> bytes
struct FakeProcess {
    pages: HashMap<u64, Vec<u8>>,
}

impl ProcessMemory for FakeProcess {
    fn read_memory(&self, address: u64, size: usize) -> Result<Vec<u8>, MemoryError> {
        self.pages
            .get(&address)
            .map(|page| page[..size.min(page.len())].to_vec())
            .ok_or(MemoryError::InvalidRegion { address, size })
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<usize, MemoryError> {
        let page = self
            .pages
            .get_mut(&address)
            .ok_or_else(|| MemoryError::WriteFailed {
                address,
                reason: "Bad address".into(),
            })?;
        page[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

struct StoppedThread<'a> {
    base: u64,
    len: u64,
    process: &'a mut FakeProcess,
}

impl Frame for StoppedThread<'_> {
    fn thread_id(&self) -> u32 {
        4242
    }

    fn pc(&self) -> u64 {
        NOTIFY_ADDR
    }

    fn find_register(&self, name: &str) -> Option<RegisterValue> {
        let (base_reg, len_reg) = Arch::host().argument_registers();
        if name == base_reg {
            Some(RegisterValue::new(name, self.base))
        } else if name == len_reg {
            Some(RegisterValue::new(name, self.len))
        } else {
            None
        }
    }

    fn process(&mut self) -> &mut dyn ProcessMemory {
        &mut *self.process
    }
}

fn symbols() -> Vec<SymbolInfo> {
    ["main", "NOTIFY_DEBUGGER_ABOUT_RX_PAGES", "NOTIFY_DEBUGGER_ABOUT_RX_PAGES_v2"]
        .iter()
        .enumerate()
        .map(|(i, name)| SymbolInfo {
            name: name.to_string(),
            address: if i == 1 { NOTIFY_ADDR } else { 0x5555_0000_2000 + i as u64 * 0x10 },
            size: 4,
            module: "/opt/jit/libengine.so".into(),
        })
        .collect()
}

#[test]
fn notification_hits_write_marker_and_continue() {
    let mut debugger = Debugger::new();
    let id = rx_pages::init_module(&mut debugger).unwrap();

    let mut target = debugger.create_target();
    assert!(!target.is_dummy());
    assert_eq!(target.resolve_locations(&symbols()), vec![NOTIFY_ADDR]);

    let mut process = FakeProcess {
        pages: HashMap::from([(0x7f00_0000_0000, vec![0u8; 4096]), (0x7f00_0001_0000, vec![0u8; 4])]),
    };

    let mut frame = StoppedThread {
        base: 0x7f00_0000_0000,
        len: 4096,
        process: &mut process,
    };
    let outcome = target
        .handle_hit(NOTIFY_ADDR, &mut frame, debugger.callbacks())
        .unwrap();
    assert_eq!(outcome.breakpoint_ids, vec![id]);
    assert!(outcome.auto_continue);

    let mut frame = StoppedThread {
        base: 0x7f00_0001_0000,
        len: 4,
        process: &mut process,
    };
    assert!(target
        .handle_hit(NOTIFY_ADDR, &mut frame, debugger.callbacks())
        .unwrap()
        .auto_continue);

    assert_eq!(process.read_memory(0x7f00_0000_0000, 8).unwrap(), b"IHELPED!");
    assert_eq!(process.read_memory(0x7f00_0000_0000, 9).unwrap()[8], 0);
    assert_eq!(process.read_memory(0x7f00_0001_0000, 4).unwrap(), b"IHEL");
    assert_eq!(target.breakpoint(id).unwrap().hit_count(), 2);
    // The template keeps no hit state
    assert_eq!(debugger.dummy_target().breakpoint(id).unwrap().hit_count(), 0);
}

#[test]
fn bad_notifications_still_continue() {
    let mut debugger = Debugger::new();
    rx_pages::init_module(&mut debugger).unwrap();
    let mut target = debugger.create_target();
    target.resolve_locations(&symbols());

    let mut process = FakeProcess {
        pages: HashMap::new(),
    };
    for (base, len) in [(0, 4096), (0x1000, 0), (0xdead_0000, 4096)] {
        let mut frame = StoppedThread {
            base,
            len,
            process: &mut process,
        };
        let outcome = target
            .handle_hit(NOTIFY_ADDR, &mut frame, debugger.callbacks())
            .unwrap();
        assert!(outcome.auto_continue);
    }
    assert!(process.pages.is_empty());
}

#[test]
fn custom_marker_flows_through_breakpoint_args() {
    let mut debugger = Debugger::new();
    let config = RxPageConfig {
        marker: b"JITOK".to_vec(),
        ..RxPageConfig::default()
    };
    rx_pages::init_module_with(&mut debugger, &config).unwrap();
    let mut target = debugger.create_target();
    target.resolve_locations(&symbols());

    let mut process = FakeProcess {
        pages: HashMap::from([(0x9000, vec![0xffu8; 16])]),
    };
    let mut frame = StoppedThread {
        base: 0x9000,
        len: 16,
        process: &mut process,
    };
    target
        .handle_hit(NOTIFY_ADDR, &mut frame, debugger.callbacks())
        .unwrap();
    assert_eq!(process.read_memory(0x9000, 6).unwrap(), b"JITOK\xff");
}

#[test]
fn unrelated_address_is_not_ours() {
    let mut debugger = Debugger::new();
    rx_pages::init_module(&mut debugger).unwrap();
    let mut target = debugger.create_target();
    target.resolve_locations(&symbols());

    let mut process = FakeProcess {
        pages: HashMap::new(),
    };
    let mut frame = StoppedThread {
        base: 0x1000,
        len: 8,
        process: &mut process,
    };
    assert!(target
        .handle_hit(0x1234, &mut frame, debugger.callbacks())
        .is_none());
}
