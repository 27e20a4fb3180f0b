use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use davstore_file::{DataStore, Home, HomeChild, StoreConfig, StoreKind, Transaction};
use davstore_props::{FilePropertyStore, PropertyStore};
use davstore_types::Component;
use serde_json::json;
use tracing::warn;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let store = open_store(&cli)?;
    let json = matches!(cli.format, OutputFormat::Json);
    match cli.command {
        Command::Homes => cmd_homes(&store, json),
        Command::Provision(args) => cmd_provision(&store, args, json),
        Command::Ls(args) => cmd_ls(&store, args, json),
        Command::Mkcol(args) => cmd_mkcol(&store, args),
        Command::Rmcol(args) => cmd_rmcol(&store, args),
        Command::Put(args) => cmd_put(&store, args, json),
        Command::Get(args) => cmd_get(&store, args, json),
        Command::Rm(args) => cmd_rm(&store, args),
        Command::Ctag(args) => cmd_ctag(&store, args, json),
        Command::Props(args) => cmd_props(&store, args, json),
    }
}

/// Build the store from `--config`, then apply `--root`.
pub fn open_store(cli: &Cli) -> anyhow::Result<DataStore> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => StoreConfig::for_root(".", cli.kind.into()),
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    config.validate()?;
    Ok(DataStore::new(config))
}

impl From<KindArg> for StoreKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Calendar => StoreKind::Calendar,
            KindArg::Addressbook => StoreKind::AddressBook,
        }
    }
}

/// Run `f` in a transaction, committing on success and aborting on error.
fn with_transaction<T>(
    store: &DataStore,
    label: &str,
    f: impl FnOnce(&Transaction) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let txn = store.new_transaction(label);
    match f(&txn) {
        Ok(value) => {
            txn.commit().with_context(|| format!("committing {label}"))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort) = txn.abort() {
                warn!(txn = label, error = %abort, "abort failed");
            }
            Err(e)
        }
    }
}

fn existing_home(txn: &Transaction, uid: &str) -> anyhow::Result<Home> {
    txn.home_with_uid(uid, false)?
        .ok_or_else(|| anyhow!("no home with uid {uid}"))
}

fn existing_child(home: &Home, name: &str) -> anyhow::Result<HomeChild> {
    home.child_with_name(name)?
        .ok_or_else(|| anyhow!("no collection {name} in home {}", home.uid()))
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_homes(store: &DataStore, json: bool) -> anyhow::Result<()> {
    let uids = store.home_uids()?;
    if json {
        return print_json(&json!(uids));
    }
    if uids.is_empty() {
        println!("No homes in {}.", store.root().display());
    }
    for uid in uids {
        println!("{}", uid.cyan());
    }
    Ok(())
}

fn cmd_provision(store: &DataStore, args: HomeArgs, json: bool) -> anyhow::Result<()> {
    let (path, children) = provision_home(store, &args.uid)?;
    if json {
        return print_json(&json!({ "uid": args.uid, "path": path.display().to_string(), "children": children }));
    }
    println!("{} Home {} at {}", "✓".green().bold(), args.uid.cyan(), path.display());
    for child in children {
        println!("  {}", child.yellow());
    }
    Ok(())
}

/// Create (or find) a home and return its committed directory and collections.
fn provision_home(store: &DataStore, uid: &str) -> anyhow::Result<(PathBuf, Vec<String>)> {
    let (home, children) = with_transaction(store, "provision", |txn| {
        let home = txn
            .home_with_uid(uid, true)?
            .ok_or_else(|| anyhow!("{uid} cannot name a home"))?;
        let children = home.list_children()?;
        Ok((home, children))
    })?;
    // A new home only reaches its final directory at commit.
    Ok((home.path(), children))
}

fn cmd_ls(store: &DataStore, args: LsArgs, json: bool) -> anyhow::Result<()> {
    with_transaction(store, "ls", |txn| {
        let home = existing_home(txn, &args.uid)?;
        match &args.collection {
            None => list_collections(&home, json),
            Some(name) => list_resources(&existing_child(&home, name)?, json),
        }
    })
}

fn list_collections(home: &Home, json: bool) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for child in home.children()? {
        let token = child.sync_token()?.map(|t| t.to_string());
        rows.push((child.name(), token));
    }
    if json {
        let rows: Vec<_> = rows
            .iter()
            .map(|(name, ctag)| json!({ "name": name, "ctag": ctag }))
            .collect();
        return print_json(&json!(rows));
    }
    for (name, token) in rows {
        let token = token.unwrap_or_else(|| "-".into());
        println!("{}  {}", name.yellow().bold(), token.dimmed());
    }
    Ok(())
}

fn list_resources(child: &HomeChild, json: bool) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for resource in child.object_resources()? {
        rows.push(json!({
            "name": resource.name(),
            "uid": resource.uid()?,
            "size": resource.size()?,
            "etag": resource.etag()?,
            "modified": resource.modified()?.to_rfc3339(),
        }));
    }
    if json {
        return print_json(&json!(rows));
    }
    for row in &rows {
        println!(
            "{}  {}  {:>8}  {}",
            row["name"].as_str().unwrap_or_default().yellow(),
            row["uid"].as_str().unwrap_or_default(),
            row["size"],
            row["modified"].as_str().unwrap_or_default().dimmed()
        );
    }
    Ok(())
}

fn cmd_mkcol(store: &DataStore, args: CollectionArgs) -> anyhow::Result<()> {
    with_transaction(store, "mkcol", |txn| {
        let home = existing_home(txn, &args.uid)?;
        home.create_child_with_name(&args.collection)?;
        Ok(())
    })?;
    println!("{} Created collection {}", "✓".green().bold(), args.collection.yellow());
    Ok(())
}

fn cmd_rmcol(store: &DataStore, args: CollectionArgs) -> anyhow::Result<()> {
    with_transaction(store, "rmcol", |txn| {
        existing_home(txn, &args.uid)?.remove_child_with_name(&args.collection)?;
        Ok(())
    })?;
    println!("{} Removed collection {}", "✓".green().bold(), args.collection.yellow());
    Ok(())
}

fn read_input(args: &PutArgs) -> anyhow::Result<String> {
    if args.file.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))
}

fn cmd_put(store: &DataStore, args: PutArgs, json: bool) -> anyhow::Result<()> {
    let component = Component::parse(&read_input(&args)?)?;
    let (created, etag) = with_transaction(store, "put", |txn| {
        let home = txn
            .home_with_uid(&args.uid, args.parents)?
            .ok_or_else(|| anyhow!("no home with uid {}", args.uid))?;
        let child = match home.child_with_name(&args.collection)? {
            Some(child) => child,
            None if args.parents => home.create_child_with_name(&args.collection)?,
            None => bail!("no collection {} in home {}", args.collection, args.uid),
        };
        match child.object_resource_with_name(&args.resource)? {
            Some(resource) => {
                resource.set_component(&component)?;
                Ok((false, resource.etag()?))
            }
            None => {
                let resource = child.create_object_resource_with_name(&args.resource, &component)?;
                Ok((true, resource.etag()?))
            }
        }
    })?;
    if json {
        return print_json(&json!({
            "resource": args.resource,
            "uid": component.uid(),
            "created": created,
            "etag": etag,
        }));
    }
    let verb = if created { "Created" } else { "Updated" };
    println!("{} {verb} {} ({})", "✓".green().bold(), args.resource.yellow(), component.uid());
    println!("  ETag: {}", etag.dimmed());
    Ok(())
}

fn cmd_get(store: &DataStore, args: ResourceArgs, json: bool) -> anyhow::Result<()> {
    with_transaction(store, "get", |txn| {
        let child = existing_child(&existing_home(txn, &args.uid)?, &args.collection)?;
        let resource = child
            .object_resource_with_name(&args.resource)?
            .ok_or_else(|| anyhow!("no resource {} in {}", args.resource, args.collection))?;
        if json {
            return print_json(&json!({
                "name": resource.name(),
                "uid": resource.uid()?,
                "etag": resource.etag()?,
                "content_type": resource.content_type(),
                "size": resource.size()?,
                "text": resource.text()?,
            }));
        }
        print!("{}", resource.text()?);
        Ok(())
    })
}

fn cmd_rm(store: &DataStore, args: ResourceArgs) -> anyhow::Result<()> {
    with_transaction(store, "rm", |txn| {
        let child = existing_child(&existing_home(txn, &args.uid)?, &args.collection)?;
        child.remove_object_resource_with_name(&args.resource)?;
        Ok(())
    })?;
    println!("{} Removed {}", "✓".green().bold(), args.resource.yellow());
    Ok(())
}

fn cmd_ctag(store: &DataStore, args: CtagArgs, json: bool) -> anyhow::Result<()> {
    let token = with_transaction(store, "ctag", |txn| {
        let child = existing_child(&existing_home(txn, &args.uid)?, &args.collection)?;
        if args.bump || args.reset {
            child.update_sync_token(args.reset)?;
        }
        Ok(child.sync_token()?.map(|t| t.to_string()))
    })?;
    if json {
        return print_json(&json!({ "collection": args.collection, "ctag": token }));
    }
    match token {
        Some(token) => println!("{}", token.cyan()),
        None => println!("{}", "no change token yet".dimmed()),
    }
    Ok(())
}

fn cmd_props(store: &DataStore, args: PropsArgs, json: bool) -> anyhow::Result<()> {
    let entries = with_transaction(store, "props", |txn| {
        let home = existing_home(txn, &args.uid)?;
        let props: Arc<FilePropertyStore> = match (&args.collection, &args.resource) {
            (None, _) => home.properties()?,
            (Some(collection), None) => existing_child(&home, collection)?.properties()?,
            (Some(collection), Some(resource)) => existing_child(&home, collection)?
                .object_resource_with_name(resource)?
                .ok_or_else(|| anyhow!("no resource {resource} in {collection}"))?
                .properties()?,
        };
        let mut entries = Vec::new();
        for name in props.list()? {
            let value = props.get(&name)?;
            entries.push((name.to_clark(), value.into_string()));
        }
        Ok(entries)
    })?;
    if json {
        let map: serde_json::Map<_, _> = entries
            .into_iter()
            .map(|(name, value)| (name, serde_json::Value::String(value)))
            .collect();
        return print_json(&serde_json::Value::Object(map));
    }
    if entries.is_empty() {
        println!("No properties.");
    }
    for (name, value) in entries {
        println!("{} = {}", name.bold(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    fn cli(root: &std::path::Path, args: &[&str]) -> Cli {
        let root = root.to_string_lossy().into_owned();
        let mut argv = vec!["davstore", "--root", root.as_str()];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    const EVENT: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:cli-1\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    #[test]
    fn root_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("store.toml");
        fs::write(&config, "root = \"/elsewhere\"\nkind = \"addressbook\"\n").unwrap();
        let parsed = Cli::try_parse_from([
            "davstore",
            "--config",
            config.to_str().unwrap(),
            "--root",
            dir.path().to_str().unwrap(),
            "homes",
        ])
        .unwrap();
        let store = open_store(&parsed).unwrap();
        assert_eq!(store.root(), dir.path());
        assert_eq!(store.config().kind, StoreKind::AddressBook);
        assert_eq!(store.config().default_children, vec!["addressbook"]);
    }

    #[test]
    fn provision_put_get_rm() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let input = dir.path().join("event.ics");
        fs::write(&input, EVENT).unwrap();

        run_command(cli(&root, &["provision", "user01"])).unwrap();
        run_command(cli(&root, &["put", "user01", "calendar", "1.ics", input.to_str().unwrap()]))
            .unwrap();
        run_command(cli(&root, &["get", "user01", "calendar", "1.ics"])).unwrap();
        run_command(cli(&root, &["--format", "json", "ls", "user01", "calendar"])).unwrap();
        run_command(cli(&root, &["ctag", "user01", "calendar", "--bump"])).unwrap();

        let store = open_store(&cli(&root, &["homes"])).unwrap();
        assert_eq!(store.home_uids().unwrap(), vec!["user01"]);
        let resource = root.join("us/er/user01/calendar/1.ics");
        assert_eq!(fs::read_to_string(&resource).unwrap(), EVENT);

        run_command(cli(&root, &["rm", "user01", "calendar", "1.ics"])).unwrap();
        assert!(!resource.exists());
    }

    #[test]
    fn put_without_parents_needs_a_home() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("event.ics");
        fs::write(&input, EVENT).unwrap();
        let err = run_command(cli(
            dir.path(),
            &["put", "user01", "calendar", "1.ics", input.to_str().unwrap()],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("no home"));

        run_command(cli(
            dir.path(),
            &["put", "-p", "user01", "work", "1.ics", input.to_str().unwrap()],
        ))
        .unwrap();
        assert!(dir.path().join("us/er/user01/work/1.ics").is_file());
    }

    #[test]
    fn failed_command_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        run_command(cli(dir.path(), &["provision", "user01"])).unwrap();
        assert!(run_command(cli(dir.path(), &["mkcol", "user01", "calendar"])).is_err());
        assert!(run_command(cli(dir.path(), &["rmcol", "user01", "missing"])).is_err());
        run_command(cli(dir.path(), &["rmcol", "user01", "inbox"])).unwrap();
        assert!(!dir.path().join("us/er/user01/inbox").exists());
        assert!(dir.path().join("us/er/user01/calendar").is_dir());
    }

    #[test]
    fn provision_reports_the_committed_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&cli(dir.path(), &["provision", "user01"])).unwrap();
        let (path, children) = provision_home(&store, "user01").unwrap();
        assert_eq!(path, dir.path().join("us/er/user01"));
        assert!(path.is_dir());
        assert_eq!(children, vec!["calendar", "inbox"]);

        // Provisioning an existing home reports the same place.
        let (again, _) = provision_home(&store, "user01").unwrap();
        assert_eq!(again, path);
        assert!(provision_home(&store, ".x").is_err());
    }
}
