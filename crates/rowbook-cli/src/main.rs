use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rowbook_store::{api, MigrateOptions, MutationOptions, ReadOptions, SortDirection, SortSpec, StoreConfig};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rowbook")]
#[command(about = "Read and edit spreadsheet records stored in XLSX/XLSM workbooks.")]
struct Cli {
    /// Engine configuration (JSON). Defaults apply when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the worksheets with their columns and row counts.
    Meta { path: PathBuf },
    /// Print one page of a sheet's rows.
    Read(ReadArgs),
    /// Insert a row.
    Create(CreateArgs),
    /// Change fields of the row with the given key.
    Update(UpdateArgs),
    /// Remove the row with the given key.
    Delete(DeleteArgs),
    /// Print the path of a macro-free copy of the workbook, creating it when needed.
    WorkingCopy { path: PathBuf },
    /// Copy a sheet's records into a hidden data sheet.
    Migrate(MigrateArgs),
}

#[derive(Debug, Args)]
struct ReadArgs {
    path: PathBuf,
    sheet: String,

    /// 1-based page number.
    #[arg(long)]
    page: Option<usize>,

    #[arg(long)]
    page_size: Option<usize>,

    /// Case-insensitive text matched against every column.
    #[arg(long)]
    filter: Option<String>,

    /// `<column>=<text>` filter (repeatable).
    #[arg(long = "where", value_name = "COLUMN=TEXT")]
    column_filters: Vec<String>,

    /// Column to sort by.
    #[arg(long)]
    sort: Option<String>,

    /// Sort descending.
    #[arg(long, requires = "sort")]
    desc: bool,
}

#[derive(Debug, Args)]
struct WriteArgs {
    /// Recorded in the `_created_by` / `_updated_by` columns.
    #[arg(long)]
    user: Option<String>,

    /// Overwrite a macro-enabled workbook in place. Also needs `ALLOW_XLSM_OVERWRITE`.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct CreateArgs {
    path: PathBuf,
    sheet: String,

    /// Field values as a JSON object, e.g. `{"Name": "Ann", "Age": 31}`.
    #[arg(long)]
    fields: String,

    /// Position among the existing rows; appended when omitted.
    #[arg(long)]
    index: Option<usize>,

    #[command(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    path: PathBuf,
    sheet: String,
    key: String,

    /// Changed fields as a JSON object.
    #[arg(long)]
    changes: String,

    /// Fail with a version conflict unless the row is at this version.
    #[arg(long)]
    expected_version: Option<u64>,

    #[command(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    path: PathBuf,
    sheet: String,
    key: String,

    #[arg(long)]
    expected_version: Option<u64>,

    #[command(flatten)]
    write: WriteArgs,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    path: PathBuf,

    /// Name of the data sheet; defaults to `dataSheetName` from the config.
    #[arg(long)]
    data_sheet: Option<String>,

    /// Sheet to copy; defaults to the first non-internal worksheet.
    #[arg(long)]
    source_sheet: Option<String>,

    /// Report what would be copied without writing anything.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    force: bool,
}

fn mutation_options(write: WriteArgs, index: Option<usize>) -> MutationOptions {
    MutationOptions {
        force_overwrite: write.force,
        user: write.user,
        index,
    }
}

fn parse_json(label: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("--{label} is not valid JSON"))
}

fn read_options(args: &ReadArgs) -> Result<ReadOptions> {
    let mut options = ReadOptions {
        page: args.page,
        page_size: args.page_size,
        filter: args.filter.clone(),
        sort: args.sort.clone().map(|column| SortSpec {
            column,
            direction: if args.desc {
                SortDirection::Desc
            } else {
                SortDirection::Asc
            },
        }),
        ..Default::default()
    };
    for raw in &args.column_filters {
        let (column, text) = raw
            .split_once('=')
            .with_context(|| format!("--where expects COLUMN=TEXT, got {raw:?}"))?;
        options
            .column_filters
            .insert(column.to_string(), text.to_string());
    }
    Ok(options)
}

fn run(cli: Cli) -> Result<Value> {
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };

    let envelope = match cli.command {
        Command::Meta { path } => api::get_workbook_meta(&path, &config),
        Command::Read(args) => {
            let options = read_options(&args)?;
            api::read_sheet(&args.path, &args.sheet, &options, &config)
        }
        Command::Create(args) => {
            let fields = parse_json("fields", &args.fields)?;
            let options = mutation_options(args.write, args.index);
            api::create_row(&args.path, &args.sheet, &fields, &options, &config)
        }
        Command::Update(args) => {
            let changes = parse_json("changes", &args.changes)?;
            let options = mutation_options(args.write, None);
            api::update_row(
                &args.path,
                &args.sheet,
                &args.key,
                &changes,
                args.expected_version,
                &options,
                &config,
            )
        }
        Command::Delete(args) => {
            let options = mutation_options(args.write, None);
            api::delete_row(
                &args.path,
                &args.sheet,
                &args.key,
                args.expected_version,
                &options,
                &config,
            )
        }
        Command::WorkingCopy { path } => api::ensure_working_copy(&path),
        Command::Migrate(args) => {
            let options = MigrateOptions {
                data_sheet: args.data_sheet,
                source_sheet: args.source_sheet,
                dry_run: args.dry_run,
                force_overwrite: args.force,
            };
            api::migrate_to_data_sheet(&args.path, &options, &config)
        }
    };
    Ok(envelope)
}

/// Write `value` as one line of JSON. A closed stdout is not an error.
fn emit(value: &Value) -> Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    let written = serde_json::to_writer(&mut handle, value)
        .map_err(std::io::Error::from)
        .and_then(|()| handle.write_all(b"\n"))
        .and_then(|()| handle.flush());
    match written {
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        other => Ok(other?),
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let envelope = run(Cli::parse())?;
    emit(&envelope)?;
    if envelope.get("error").is_some() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
