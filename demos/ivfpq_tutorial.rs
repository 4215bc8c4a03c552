//! IVF-PQ walkthrough: train, add, sanity-check and search.
//!
//! Run with: cargo run --release --example ivfpq_tutorial
//! Set `RUST_LOG=forge_ivfpq=debug` to follow k-means progress.

use forge_ivfpq::dataset::{recall_at_k, Dataset};
use forge_ivfpq::IVFPQIndex;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> forge_ivfpq::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (d, nb, nq) = (64, 100_000, 10_000);
    let (nlist, m, nbits) = (100, 8, 8);

    println!("Generating {} database and {} query vectors...", nb, nq);
    let data = Dataset::generate(nb, nq, d, 1234);

    let mut index = IVFPQIndex::new(d, nlist, m, nbits)?;

    let start = Instant::now();
    index.train(&data.vectors)?;
    println!("Trained in {:.2}s", start.elapsed().as_secs_f64());

    let start = Instant::now();
    index.add(&data.vectors)?;
    println!(
        "Added {} vectors in {:.2}s",
        index.len(),
        start.elapsed().as_secs_f64()
    );

    // Sanity check: database vectors should find themselves.
    let results = index.search(&data.vectors[..5], 4, 10)?;
    println!("\nSanity check (ids, nprobe=10):");
    for q in 0..results.len() {
        println!("  {:?}  {:?}", results.query_ids(q), results.query_distances(q));
    }

    let (results, stats) = index.search_with_stats(&data.queries, 4, 10)?;
    println!("\nLast 5 query results:");
    for q in results.len() - 5..results.len() {
        println!("  {:?}", results.query_ids(q));
    }
    println!("\n{}", stats.summary());

    println!("\nRecall on the first 200 queries:");
    let mut sample = Dataset {
        dimension: d,
        vectors: data.vectors.clone(),
        queries: data.queries[..200].to_vec(),
        ground_truth: Vec::new(),
    };
    sample.compute_ground_truth(10)?;
    for nprobe in [1, 4, 10, 32] {
        let results = index.search(&sample.queries, 10, nprobe)?;
        let recall: f32 = (0..sample.queries.len())
            .map(|q| recall_at_k(results.query_ids(q), &sample.ground_truth[q], 10))
            .sum::<f32>()
            / sample.queries.len() as f32;
        println!("  nprobe={:3} | Recall@10: {:5.2}%", nprobe, recall * 100.0);
    }

    println!("\n{}", index.statistics().summary());
    println!("Health: {:?}", index.health_check());
    Ok(())
}
