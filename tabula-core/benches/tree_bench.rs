use std::sync::Arc;
use std::time::Instant;

use tabula_core::{
    CollectionKind, Config, EditAccumulator, Entry, MemoryChunkStore, Tree, TreeDiff, Value,
    ValueStore,
};

fn entries(n: i64, prefix: &str) -> Vec<Entry> {
    (0..n)
        .map(|i| Entry::new(Value::from(format!("key{:06}", i)), Value::from(format!("{}{}", prefix, i))))
        .collect()
}

fn main() {
    println!("Tree Performance Benchmark\n");
    println!("==========================\n");

    let config = Config::default();

    // Benchmark 1 & 2: bulk build
    for n in [10_000, 100_000] {
        let store = ValueStore::new(Arc::new(MemoryChunkStore::new()), &config);
        let items = entries(n, "value");

        let start = Instant::now();
        let (tree, stats) = Tree::build(&store, CollectionKind::Map, items).unwrap();
        let elapsed = start.elapsed();

        println!("Build {} entries:", n);
        println!("  Time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
        println!("  Rate: {:.0} entries/sec", n as f64 / elapsed.as_secs_f64());
        println!("  Height: {}", tree.height());
        println!("  Leaves written: {}", stats.leaves_written);
        println!("  Metas written: {}", stats.metas_written);
        println!();
    }

    // Benchmark 3: incremental edits
    let store = ValueStore::new(Arc::new(MemoryChunkStore::new()), &config);
    let (base, _) = Tree::build(&store, CollectionKind::Map, entries(50_000, "value")).unwrap();
    for (label, count, stride) in [("scattered", 100, 500), ("half", 25_000, 1)] {
        let mut acc = EditAccumulator::new(store.edits());
        for i in (0..count).map(|i| i * stride) {
            acc.put(Value::from(format!("key{:06}", i)), Value::from(format!("updated{}", i)));
        }

        let start = Instant::now();
        let (edited, stats) = base.apply_edits(acc.finish()).unwrap();
        let elapsed = start.elapsed();

        println!("Update {} keys ({}) of 50,000:", count, label);
        println!("  Time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
        println!("  Chunks written: {}", stats.chunks_written);
        println!("  Chunks reused: {}", stats.chunks_reused);
        println!("  Regions: {}", stats.regions);

        // Benchmark 4: diff against the base
        let start = Instant::now();
        let mut diff = TreeDiff::new(&base, &edited, None).unwrap();
        let changes = diff.by_ref().filter(|e| e.is_ok()).count();
        let elapsed = start.elapsed();
        let diff_stats = diff.stats();

        println!("  Diff: {} changes in {:.2}ms", changes, elapsed.as_secs_f64() * 1000.0);
        println!("  Entries compared: {}", diff_stats.entries_compared);
        println!("  Subtrees skipped: {}", diff_stats.subtrees_skipped);
        println!();
    }
}
