use memsim::{
    config::SimConfig,
    core::allocator::{AllocError, MemoryDump, MemoryManager, Strategy},
    core::cache::{AccessLevel, CacheHierarchy},
    shell::Shell,
};

use std::io::Cursor;

fn buddy_free_lists(manager: &MemoryManager) -> Vec<Vec<u64>> {
    match manager.dump_memory() {
        MemoryDump::Buddy { free_lists, .. } => free_lists
            .into_iter()
            .map(|(_, _, mut addresses)| {
                addresses.sort_unstable();
                addresses
            })
            .collect(),
        MemoryDump::Linear(_) => panic!("expected a buddy layout"),
    }
}

#[test]
fn first_fit_reuses_freed_block() {
    let mut manager = MemoryManager::new();
    manager.init(64).unwrap();
    manager.set_strategy(Strategy::FirstFit).unwrap();

    let a = manager.allocate(10).unwrap();
    let b = manager.allocate(20).unwrap();
    assert_eq!((a.id, a.address, a.size), (1, 0, 16));
    assert_eq!((b.id, b.address, b.size), (2, 16, 24));

    manager.free(a.id).unwrap();
    let c = manager.allocate(8).unwrap();
    assert_eq!((c.id, c.address), (3, 0));

    let MemoryDump::Linear(blocks) = manager.dump_memory() else {
        panic!("expected a linear layout");
    };
    let layout: Vec<_> = blocks.iter().map(|b| (b.start, b.end(), b.owner)).collect();
    assert_eq!(
        layout,
        vec![(0, 8, Some(3)), (8, 16, None), (16, 40, Some(2)), (40, 64, None)],
    );
}

#[test]
fn buddy_pair_merges_back() {
    let mut manager = MemoryManager::new();
    manager.init(64).unwrap();
    manager.set_strategy(Strategy::Buddy).unwrap();

    let a = manager.allocate(8).unwrap();
    let b = manager.allocate(8).unwrap();
    assert_eq!((a.address, a.size), (0, 8));
    assert_eq!((b.address, b.size), (8, 8));

    manager.free(a.id).unwrap();
    manager.free(b.id).unwrap();
    assert_eq!(buddy_free_lists(&manager), vec![vec![], vec![], vec![], vec![0]]);
}

#[test]
fn strategies_place_differently() {
    let placements: Vec<u64> = [Strategy::FirstFit, Strategy::BestFit, Strategy::WorstFit]
        .into_iter()
        .map(|strategy| {
            let mut manager = MemoryManager::new();
            manager.set_strategy(strategy).unwrap();
            manager.init(128).unwrap();

            // Holes of 24 bytes at 0 and 8 bytes at 32, then 80
            // free bytes at the end.
            let a = manager.allocate(24).unwrap();
            manager.allocate(8).unwrap();
            let c = manager.allocate(8).unwrap();
            manager.allocate(8).unwrap();
            manager.free(a.id).unwrap();
            manager.free(c.id).unwrap();

            manager.allocate(8).unwrap().address
        })
        .collect();

    assert_eq!(placements, vec![0, 32, 48]);
}

#[test]
fn buddy_requires_power_of_two() {
    let mut manager = MemoryManager::new();
    manager.set_strategy(Strategy::Buddy).unwrap();

    let error = manager.init(96).unwrap_err();
    assert!(matches!(error, AllocError::InvalidConfiguration { size: 96, .. }));
    for _ in 0..3 {
        assert_eq!(manager.allocate(8), Err(AllocError::Uninitialized));
    }

    let stats = manager.stats();
    assert_eq!(stats.counters.failed_allocations, 3);
    assert_eq!(stats.failure_rate, Some(100.0));
}

#[test]
fn cache_hierarchy_counts_forwarded_misses() {
    let config = SimConfig::default();
    let mut caches = CacheHierarchy::new(config.l1, config.l2).unwrap();

    let levels: Vec<_> = [0, 8, 64, 0, 128, 192, 256, 0]
        .into_iter()
        .map(|address| caches.access(address))
        .collect();

    // L1 is direct mapped with 4 sets, so 0, 64, 128, 192 and 256
    // all fight over set 0; L2 has 4 ways per set and keeps the
    // first four of them until 256 evicts block 0.
    assert_eq!(
        levels,
        vec![
            AccessLevel::Memory,
            AccessLevel::L1,
            AccessLevel::Memory,
            AccessLevel::L2,
            AccessLevel::Memory,
            AccessLevel::Memory,
            AccessLevel::Memory,
            AccessLevel::Memory,
        ],
    );

    let stats = caches.stats();
    assert_eq!(stats.l1_to_l2, 7);
    assert_eq!(stats.l2_to_memory, 6);
}

#[test]
fn shell_session() {
    let input = "\
init memory 64
set allocator first_fit
malloc 10
malloc 20
free 1
free 9
access 16
dump memory
stats
exit
malloc 8
";

    let mut shell = Shell::new(&SimConfig::default()).unwrap();
    let mut output = Vec::new();
    shell.run(Cursor::new(input), &mut output).unwrap();
    let output = String::from_utf8(output).unwrap();

    assert!(output.starts_with("Memory Management Simulator\n"));
    assert!(output.contains("Memory initialized with size 64\n"));
    assert!(output.contains("Allocator set to first_fit\n"));
    assert!(output.contains("Allocated block id=1 at address=0x0000\n"));
    assert!(output.contains("Allocated block id=2 at address=0x0010\n"));
    assert!(output.contains("Block 1 freed\n"));
    assert!(output.contains("Invalid block id\n"));
    assert!(output.contains("Access 0x0010: L1 miss, L2 miss, served from memory\n"));
    assert!(output.contains("[0x0010 - 0x0027] USED (id=2)\n"));
    assert!(output.contains("Internal fragmentation: 10 bytes\n"));
    assert!(output.trim_end().ends_with("Exiting simulator..."));

    // Nothing after `exit` is executed.
    assert!(!output.contains("id=3"));
    assert_eq!(shell.memory().counters().total_requests, 2);
}

#[test]
fn shell_stops_at_end_of_input() {
    let mut shell = Shell::new(&SimConfig::default()).unwrap();
    let mut output = Vec::new();
    shell.run(Cursor::new("init memory 32\nmalloc 8\n"), &mut output).unwrap();

    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("Allocated block id=1 at address=0x0000\n"));
    assert!(output.ends_with("Exiting simulator...\n"));
}
