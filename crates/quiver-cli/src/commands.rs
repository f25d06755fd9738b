use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use quiver_store::{Bucket, BucketConfig, RepairReport};
use quiver_types::{Action, MetaKey, Object, ObjectId, Operation, Query};
use serde_json::json;
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Init => cmd_init(config, format),
        Command::Put(args) => cmd_put(&open_bucket(cli.bucket.as_deref(), config)?, args, format),
        Command::Get(args) => cmd_get(&open_bucket(cli.bucket.as_deref(), config)?, args, format),
        Command::Query(args) => cmd_query(&open_bucket(cli.bucket.as_deref(), config)?, args, format),
        Command::Rm(args) => cmd_rm(&open_bucket(cli.bucket.as_deref(), config)?, args, format),
        Command::Repair => cmd_repair(&open_bucket(cli.bucket.as_deref(), config)?, format),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<BucketConfig> {
    let mut config = match &cli.config {
        Some(path) => BucketConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BucketConfig::default(),
    };
    if let Some(dir) = &cli.dir {
        config.base_dir = dir.clone();
    }
    // A single command does not live long enough for periodic maintenance.
    config.maintenance.enabled = false;
    Ok(config)
}

fn open_bucket(path: Option<&Path>, config: BucketConfig) -> anyhow::Result<Bucket> {
    let Some(path) = path else {
        bail!("no bucket selected; pass --bucket <path> (create one with `quiver init`)");
    };
    if !path.is_dir() {
        bail!("bucket {} does not exist", path.display());
    }
    debug!(path = %path.display(), "opening bucket");
    Bucket::open_at(path, config).with_context(|| format!("opening bucket {}", path.display()))
}

fn object_json(obj: &Object) -> serde_json::Value {
    json!({
        "id": obj.id().to_string(),
        "name": obj.name(),
        "owner": obj.owner(),
        "size": obj.len(),
        "metadata": obj.metadata(),
    })
}

fn print_object(obj: &Object) {
    println!("{}  {}", obj.id().to_string().yellow(), obj.name().bold());
    println!("  Owner: {}", obj.owner().cyan());
    println!("  Size: {} bytes", obj.len());
    for (key, value) in obj.metadata().iter() {
        if ["id", "name", "owner"].contains(&key) {
            continue;
        }
        println!("  {}: {}", key, value);
    }
}

fn cmd_init(config: BucketConfig, format: OutputFormat) -> anyhow::Result<()> {
    fs::create_dir_all(&config.base_dir)
        .with_context(|| format!("creating {}", config.base_dir.display()))?;
    let bucket = Bucket::open(config)?;
    let path = bucket
        .base_path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    bucket.shutdown()?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "bucket": path })),
        OutputFormat::Text => {
            println!("{} Initialized bucket in {}", "✓".green().bold(), path.bold());
        }
    }
    Ok(())
}

fn cmd_put(bucket: &Bucket, args: PutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let data = fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let mut obj = Object::new(args.name, &args.owner)?;
    if let Some(content_type) = args.content_type {
        obj.set_meta_key(MetaKey::ContentType, content_type)?;
    }
    for (key, value) in args.meta {
        obj.set_meta_key(key, value)?;
    }
    obj.append(&data)?;
    let id = bucket.create(&mut obj)?;
    match format {
        OutputFormat::Json => println!("{}", object_json(&obj)),
        OutputFormat::Text => println!(
            "{} Stored {} ({} bytes) as {}",
            "✓".green().bold(),
            obj.name().bold(),
            obj.len(),
            id.to_string().yellow()
        ),
    }
    Ok(())
}

fn resolve(bucket: &Bucket, target: &TargetArgs) -> anyhow::Result<ObjectId> {
    match (&target.id, &target.name, &target.owner) {
        (Some(id), _, _) => Ok(ObjectId::parse(id)?),
        (None, Some(name), Some(owner)) => Ok(bucket.get_by_name(name, owner)?.id()),
        _ => bail!("select an object with --id or with --name and --owner"),
    }
}

fn cmd_get(bucket: &Bucket, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = resolve(bucket, &args.target)?;
    if let Some(out) = &args.out {
        let file = File::create(out).with_context(|| format!("creating {}", out.display()))?;
        let written = bucket.read(&id, &mut BufWriter::new(file))?;
        match format {
            OutputFormat::Json => println!("{}", json!({ "id": id.to_string(), "bytes": written })),
            OutputFormat::Text => println!(
                "{} Wrote {} bytes to {}",
                "✓".green().bold(),
                written,
                out.display().to_string().bold()
            ),
        }
        return Ok(());
    }
    let obj = bucket.get_by_id(&id)?;
    match format {
        OutputFormat::Json => println!("{}", object_json(&obj)),
        OutputFormat::Text => print_object(&obj),
    }
    Ok(())
}

fn build_query(args: &QueryArgs) -> Query {
    let mut query = Query::new()
        .action(if args.and { Action::And } else { Action::Or })
        .operation(if args.delete { Operation::Delete } else { Operation::Get });
    if let Some(owner) = &args.owner {
        query = query.owner(owner.clone());
    }
    if let Some(id) = &args.id {
        query = query.id(id.clone());
    }
    if let Some(name) = &args.name {
        query = query.name(name.clone());
    }
    for (key, value) in &args.params {
        query = query.param(key, value.clone());
    }
    query
}

fn cmd_query(bucket: &Bucket, args: QueryArgs, format: OutputFormat) -> anyhow::Result<()> {
    let query = build_query(&args);
    match bucket.execute(&query)? {
        quiver_store::QueryOutcome::Fetched(objects) => match format {
            OutputFormat::Json => {
                let list: Vec<_> = objects.iter().map(object_json).collect();
                println!("{}", serde_json::Value::Array(list));
            }
            OutputFormat::Text if objects.is_empty() => println!("No matching objects."),
            OutputFormat::Text => {
                for obj in &objects {
                    print_object(obj);
                }
                println!("\n{} object(s)", objects.len().to_string().bold());
            }
        },
        quiver_store::QueryOutcome::Deleted(count) => match format {
            OutputFormat::Json => println!("{}", json!({ "deleted": count })),
            OutputFormat::Text => println!("{} Deleted {} object(s)", "✓".green().bold(), count),
        },
    }
    Ok(())
}

fn cmd_rm(bucket: &Bucket, args: TargetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let id = resolve(bucket, &args)?;
    bucket.delete_by_id(&id)?;
    match format {
        OutputFormat::Json => println!("{}", json!({ "deleted": id.to_string() })),
        OutputFormat::Text => println!("{} Deleted {}", "✓".green().bold(), id.to_string().yellow()),
    }
    Ok(())
}

fn cmd_repair(bucket: &Bucket, format: OutputFormat) -> anyhow::Result<()> {
    let RepairReport {
        orphaned_payloads,
        orphaned_metadata,
        restored_names,
        dangling_names,
    } = bucket.reconcile()?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            json!({
                "orphaned_payloads": orphaned_payloads,
                "orphaned_metadata": orphaned_metadata,
                "restored_names": restored_names,
                "dangling_names": dangling_names,
            })
        ),
        OutputFormat::Text => {
            let total = orphaned_payloads + orphaned_metadata + restored_names + dangling_names;
            if total == 0 {
                println!("{} No issues.", "✓".green().bold());
            } else {
                println!("{} Repaired {} issue(s)", "✓".green().bold(), total);
                println!("  Orphaned payloads: {}", orphaned_payloads);
                println!("  Orphaned metadata: {}", orphaned_metadata);
                println!("  Restored names: {}", restored_names);
                println!("  Dangling names: {}", dangling_names);
            }
        }
    }
    bucket.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn query_args(argv: &[&str]) -> QueryArgs {
        let mut full = vec!["quiver", "query"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Query(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn query_defaults_to_or_get() {
        let query = build_query(&query_args(&["--param", "contentType=text/plain"]));
        assert_eq!(query.logic(), Action::Or);
        assert_eq!(query.op(), Operation::Get);
        assert_eq!(query.params().get(MetaKey::ContentType), Some("text/plain"));
    }

    #[test]
    fn name_without_owner_is_rejected_by_validation() {
        let query = build_query(&query_args(&["--name", "a", "--and"]));
        assert_eq!(query.logic(), Action::And);
        assert!(query.validate().is_err());
    }

    #[test]
    fn put_get_rm_against_a_real_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BucketConfig::with_base_dir(dir.path());
        config.maintenance.enabled = false;
        config.engine.map_size = 16 * 1024 * 1024;
        let bucket = Bucket::open(config).unwrap();

        let file = dir.path().join("note.txt");
        fs::write(&file, b"remember the milk").unwrap();
        let owner = "3f1c9a52-8e0b-4d7a-b6c1-2a9e5f7d0b34".to_string();
        cmd_put(
            &bucket,
            PutArgs {
                file,
                name: "note.txt".into(),
                owner: owner.clone(),
                content_type: Some("text/plain".into()),
                meta: vec![("tag".into(), "todo".into())],
            },
            OutputFormat::Json,
        )
        .unwrap();

        let target = TargetArgs {
            id: None,
            name: Some("note.txt".into()),
            owner: Some(owner.clone()),
        };
        let id = resolve(&bucket, &target).unwrap();
        assert_eq!(bucket.get_meta(&id).unwrap().get("tag"), Some("todo"));

        let out = dir.path().join("copy.txt");
        cmd_get(
            &bucket,
            GetArgs {
                target: TargetArgs {
                    id: Some(id.to_string()),
                    name: None,
                    owner: None,
                },
                out: Some(out.clone()),
            },
            OutputFormat::Text,
        )
        .unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"remember the milk");

        cmd_rm(&bucket, target, OutputFormat::Text).unwrap();
        assert!(!bucket.exists(&id).unwrap());
        cmd_repair(&bucket, OutputFormat::Json).unwrap();
    }
}
