use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use patchvec_ingest::CsvOptions;
use patchvec_model::{MetaValue, RawFilters};
use patchvec_service::auth::authenticate;
use patchvec_service::{AuthContext, Config, PatchVecService, ServiceError};

struct GlobalOpts {
    config_path: Option<PathBuf>,
    data_dir: Option<String>,
    token: Option<String>,
    compact: bool,
}

fn print_usage() {
    eprintln!(
        "Usage: patchvec [--config PATH] [--data-dir DIR] [--token TOKEN] [--compact] <command> [args]\n\
         \n\
         Commands:\n\
         \x20 create-collection TENANT COLLECTION\n\
         \x20 delete-collection TENANT COLLECTION\n\
         \x20 rename-collection TENANT OLD NEW\n\
         \x20 list-collections TENANT\n\
         \x20 list-tenants\n\
         \x20 delete-document TENANT COLLECTION DOCID\n\
         \x20 ingest TENANT COLLECTION FILE [--docid ID] [--metadata KEY=VALUE ...] [--content-type TYPE]\n\
         \x20           [--csv-has-header yes|no|auto] [--csv-meta-cols SPEC] [--csv-include-cols SPEC]\n\
         \x20 search TENANT COLLECTION QUERY [-k N] [--filters KEY=VALUE ...]\n\
         \x20 dump-archive [--output PATH]\n\
         \x20 restore-archive ARCHIVE_PATH\n\
         \x20 reset-metrics\n\
         \x20 metrics [--prometheus]\n"
    );
}

/// Split off leading `--config`/`--data-dir`/`--token`/`--compact` flags
/// (which may appear before or after the subcommand) from positional args.
fn split_global_opts(args: Vec<String>) -> (GlobalOpts, Vec<String>) {
    let mut opts = GlobalOpts { config_path: None, data_dir: None, token: None, compact: false };
    let mut rest = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                opts.config_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--data-dir" if i + 1 < args.len() => {
                opts.data_dir = Some(args[i + 1].clone());
                i += 2;
            }
            "--token" if i + 1 < args.len() => {
                opts.token = Some(args[i + 1].clone());
                i += 2;
            }
            "--compact" => {
                opts.compact = true;
                i += 1;
            }
            other => {
                rest.push(other.to_string());
                i += 1;
            }
        }
    }
    (opts, rest)
}

fn print_json(value: &serde_json::Value, compact: bool) {
    let text = if compact { serde_json::to_string(value) } else { serde_json::to_string_pretty(value) };
    println!("{}", text.unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}")));
}

fn parse_kv(spec: &str) -> Option<(String, String)> {
    spec.split_once('=').map(|(k, v)| (k.to_string(), v.to_string()))
}

fn build_service(opts: &GlobalOpts) -> Result<PatchVecService, String> {
    let mut cfg = Config::load(opts.config_path.as_deref()).map_err(|e| e.to_string())?;
    if let Some(dir) = &opts.data_dir {
        cfg.data_dir = dir.clone();
    }
    PatchVecService::new(cfg).map_err(|e| e.to_string())
}

fn build_ctx(svc: &PatchVecService, opts: &GlobalOpts) -> Result<AuthContext, String> {
    authenticate(&svc.config().auth, opts.token.as_deref()).map_err(|e| e.to_string())
}

fn run(opts: GlobalOpts, mut args: Vec<String>) -> Result<serde_json::Value, String> {
    if args.is_empty() {
        return Err("missing command".to_string());
    }
    let command = args.remove(0);
    let svc = build_service(&opts)?;
    let ctx = build_ctx(&svc, &opts)?;

    let result = match command.as_str() {
        "create-collection" => {
            require_args(&args, 2, "create-collection TENANT COLLECTION")?;
            svc.create_collection(&ctx, &args[0], &args[1])
        }
        "delete-collection" => {
            require_args(&args, 2, "delete-collection TENANT COLLECTION")?;
            svc.delete_collection(&ctx, &args[0], &args[1])
        }
        "rename-collection" => {
            require_args(&args, 3, "rename-collection TENANT OLD NEW")?;
            svc.rename_collection(&ctx, &args[0], &args[1], &args[2])
        }
        "list-collections" => {
            require_args(&args, 1, "list-collections TENANT")?;
            svc.list_collections(&ctx, &args[0])
        }
        "list-tenants" => svc.list_tenants(&ctx),
        "delete-document" => {
            require_args(&args, 3, "delete-document TENANT COLLECTION DOCID")?;
            svc.delete_document(&ctx, &args[0], &args[1], &args[2])
        }
        "ingest" => do_ingest(&svc, &ctx, args)?,
        "search" => do_search(&svc, &ctx, args)?,
        "dump-archive" => {
            let out = positional_flag(&args, "--output").map(PathBuf::from);
            let (path, _tmp) = svc.dump_archive(&ctx, out.as_deref()).map_err(to_string_err)?;
            Ok(serde_json::json!({ "ok": true, "archive_path": path.display().to_string() }))
        }
        "restore-archive" => {
            require_args(&args, 1, "restore-archive ARCHIVE_PATH")?;
            let bytes = std::fs::read(&args[0]).map_err(|e| e.to_string())?;
            svc.restore_archive(&ctx, &bytes)
        }
        "reset-metrics" => svc.reset_metrics(&ctx),
        "metrics" => {
            if args.iter().any(|a| a == "--prometheus") {
                println!("{}", svc.metrics_prometheus());
                return Ok(serde_json::Value::Null);
            }
            Ok(svc.metrics_snapshot())
        }
        other => return Err(format!("unknown command: {other}")),
    };
    result.map_err(to_string_err)
}

fn to_string_err(e: ServiceError) -> String {
    format!("{}: {}", e.code, e.message)
}

fn require_args(args: &[String], n: usize, usage: &str) -> Result<(), String> {
    if args.len() < n {
        return Err(format!("usage: {usage}"));
    }
    Ok(())
}

fn positional_flag(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).cloned()
}

fn do_ingest(svc: &PatchVecService, ctx: &AuthContext, args: Vec<String>) -> Result<Result<serde_json::Value, ServiceError>, String> {
    require_args(
        &args,
        3,
        "ingest TENANT COLLECTION FILE [--docid ID] [--metadata KEY=VALUE ...] [--content-type TYPE] \
         [--csv-has-header yes|no|auto] [--csv-meta-cols SPEC] [--csv-include-cols SPEC]",
    )?;
    let tenant = &args[0];
    let collection = &args[1];
    let file = &args[2];

    let mut docid: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut metadata = BTreeMap::new();
    let mut csv_options = CsvOptions::default();
    let mut csv_options_set = false;
    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--docid" if i + 1 < args.len() => {
                docid = Some(args[i + 1].clone());
                i += 2;
            }
            "--content-type" if i + 1 < args.len() => {
                content_type = Some(args[i + 1].clone());
                i += 2;
            }
            "--metadata" if i + 1 < args.len() => {
                if let Some((k, v)) = parse_kv(&args[i + 1]) {
                    metadata.insert(k, MetaValue::String(v));
                }
                i += 2;
            }
            "--csv-has-header" if i + 1 < args.len() => {
                csv_options.has_header = Some(args[i + 1].clone());
                csv_options_set = true;
                i += 2;
            }
            "--csv-meta-cols" if i + 1 < args.len() => {
                csv_options.meta_cols = Some(args[i + 1].clone());
                csv_options_set = true;
                i += 2;
            }
            "--csv-include-cols" if i + 1 < args.len() => {
                csv_options.include_cols = Some(args[i + 1].clone());
                csv_options_set = true;
                i += 2;
            }
            _ => i += 1,
        }
    }

    let bytes = std::fs::read(file).map_err(|e| e.to_string())?;
    let filename = std::path::Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.clone());

    Ok(svc.ingest_document(
        ctx,
        tenant,
        collection,
        &filename,
        &bytes,
        docid.as_deref(),
        metadata,
        content_type.as_deref(),
        csv_options_set.then_some(csv_options),
    ))
}

fn do_search(svc: &PatchVecService, ctx: &AuthContext, args: Vec<String>) -> Result<Result<serde_json::Value, ServiceError>, String> {
    require_args(&args, 3, "search TENANT COLLECTION QUERY [-k N] [--filters KEY=VALUE ...]")?;
    let tenant = &args[0];
    let collection = &args[1];
    let query = &args[2];

    let mut k: usize = 10;
    let mut filters: RawFilters = RawFilters::new();
    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "-k" if i + 1 < args.len() => {
                k = args[i + 1].parse().unwrap_or(10);
                i += 2;
            }
            "--filters" if i + 1 < args.len() => {
                if let Some((key, value)) = parse_kv(&args[i + 1]) {
                    filters.entry(key).or_default().push(value);
                }
                i += 2;
            }
            _ => i += 1,
        }
    }

    Ok(svc.search(ctx, tenant, collection, query, k, &filters, None))
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        std::process::exit(1);
    }
    let (opts, rest) = split_global_opts(args);
    let compact = opts.compact;

    match run(opts, rest) {
        Ok(value) => {
            if !value.is_null() {
                print_json(&value, compact);
            }
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}
