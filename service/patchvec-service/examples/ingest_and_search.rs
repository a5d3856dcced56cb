use patchvec_model::RawFilters;
use patchvec_service::{AuthContext, Config, PatchVecService};
use std::collections::BTreeMap;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: cargo run -p patchvec-service --example ingest_and_search -- <FILE> <QUERY>");
        std::process::exit(1);
    }
    let path = &args[1];
    let query = &args[2];

    let tmp = tempfile::tempdir()?;
    let mut cfg = Config::default();
    cfg.data_dir = tmp.path().to_string_lossy().to_string();
    let svc = PatchVecService::new(cfg)?;
    let ctx = AuthContext { tenant: None, is_admin: true };

    svc.create_collection(&ctx, "demo", "docs")?;

    let filename = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let bytes = std::fs::read(path)?;
    svc.ingest_document(&ctx, "demo", "docs", &filename, &bytes, None, BTreeMap::new(), None, None)?;

    let result = svc.search(&ctx, "demo", "docs", query, 10, &RawFilters::new(), None)?;
    let hits = result["matches"].as_array().cloned().unwrap_or_default();
    println!("Results: {}", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let text = hit["text"].as_str().unwrap_or("");
        let preview: String = text.chars().take(80).collect();
        println!(
            "{:>2}. [{}] {:.4} {}",
            i + 1,
            hit["chunk_id"].as_str().unwrap_or(""),
            hit["score"].as_f64().unwrap_or(0.0),
            preview
        );
    }
    Ok(())
}
