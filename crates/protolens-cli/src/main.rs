//! protolens - Inspect Protocol Buffer blobs from the command line
//!
//! This tool decodes opaque protobuf payloads, either schema-less as a wire
//! tree or against compiled descriptor sets, and can guess which message
//! type a blob holds.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use protolens_core::classify::CandidateScore;
use protolens_core::{
    decode_base64, hex_dump, ClassifierConfig, ColumnTypeMapping, DescriptorRegistry, Formatter,
    InspectRequest, Inspection, Inspector, SchemaDecoder, TypeClassifier, WireScanner,
};
use serde_json::{json, Map, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// File extensions picked up from a descriptor directory
const DESCRIPTOR_EXTENSIONS: &[&str] = &["desc", "pb", "binpb", "protoset"];

/// Inspect Protocol Buffer blobs with or without a schema
#[derive(Parser, Debug)]
#[command(name = "protolens")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the schema-less wire tree of a blob
    Wire {
        #[command(flatten)]
        input: InputArgs,
    },

    /// List loaded descriptors and their message types
    Types {
        #[command(flatten)]
        schema: SchemaArgs,
    },

    /// Decode a blob as a given message type
    Decode {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        schema: SchemaArgs,

        /// Qualified message type name
        #[arg(short = 't', long = "type")]
        type_name: String,
    },

    /// Guess the message type of a blob
    Detect {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        schema: SchemaArgs,

        /// Minimum confidence a type needs to be reported
        #[arg(long, default_value = "0.5")]
        min_confidence: f64,

        /// Print the score of every candidate instead of the decoded blob
        #[arg(long)]
        all: bool,
    },

    /// Pick a type (manual, mapped or detected) and decode, falling back to the wire tree
    Inspect {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        schema: SchemaArgs,

        /// Qualified message type name; skips mapping and detection
        #[arg(short = 't', long = "type")]
        type_name: Option<String>,

        /// JSON file with a column-to-type mapping rule
        #[arg(long, requires = "row")]
        mapping: Option<PathBuf>,

        /// JSON file with the data row the mapping is evaluated on
        #[arg(long, requires = "mapping")]
        row: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputArgs {
    /// Path to a file holding the raw blob
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// The blob as base64 text
    #[arg(short, long)]
    base64: Option<String>,
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Serialized FileDescriptorSet to load (repeatable)
    #[arg(short = 'd', long = "descriptor")]
    descriptors: Vec<PathBuf>,

    /// Directory searched recursively for descriptor sets
    #[arg(long)]
    descriptor_dir: Option<PathBuf>,

    /// Descriptor to use when several are loaded (file stem)
    #[arg(short, long)]
    name: Option<String>,
}

/// Output format for results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Indented text
    Text,
    /// Pretty-printed JSON
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output = run(&cli.command, cli.format)?;
    println!("{}", output);
    Ok(())
}

/// Execute a subcommand and return what should be printed
fn run(command: &Command, format: OutputFormat) -> Result<String> {
    match command {
        Command::Wire { input } => {
            let data = read_input(input)?;
            let tree = match WireScanner::new().scan_tree(&data) {
                Ok(tree) => tree,
                Err(e) => {
                    eprintln!("{}", hex_dump(&data));
                    return Err(e).context("Input is not protobuf wire format");
                }
            };
            Ok(match format {
                OutputFormat::Text => Formatter::new().format_wire(&tree),
                OutputFormat::Json => pretty(&tree.to_json())?,
            })
        }

        Command::Types { schema } => {
            let registry = load_descriptors(schema)?;
            if registry.names().is_empty() {
                bail!("No descriptors loaded (use --descriptor or --descriptor-dir)");
            }
            render_types(&registry, format)
        }

        Command::Decode {
            input,
            schema,
            type_name,
        } => {
            let registry = load_descriptors(schema)?;
            let name = select_descriptor(&registry, schema.name.as_deref())?;
            let data = read_input(input)?;

            let resolved = registry.resolve(&name, type_name)?;
            let value = SchemaDecoder::new(resolved.entry())
                .decode_bytes(&data, resolved.message())
                .with_context(|| format!("Failed to decode as {}", type_name))?;

            Ok(match format {
                OutputFormat::Text => Formatter::new().format(&value),
                OutputFormat::Json => pretty(&value.to_json())?,
            })
        }

        Command::Detect {
            input,
            schema,
            min_confidence,
            all,
        } => {
            let registry = load_descriptors(schema)?;
            let name = select_descriptor(&registry, schema.name.as_deref())?;
            let data = read_input(input)?;

            let classifier =
                TypeClassifier::with_config(ClassifierConfig::new().min_confidence(*min_confidence));

            if *all {
                let Some(entry) = registry.entry(&name) else {
                    bail!("Descriptor '{}' is not loaded", name);
                };
                let ranked = classifier.rank(&data, &entry)?;
                return render_ranking(&ranked, format);
            }

            match classifier.classify(&data, &registry, &name)? {
                Some(result) => Ok(match format {
                    OutputFormat::Text => format!(
                        "# {} (confidence {:.2})\n{}",
                        result.type_name,
                        result.confidence,
                        Formatter::new().format(&result.decoded)
                    ),
                    OutputFormat::Json => pretty(&json!({
                        "type": result.type_name,
                        "confidence": result.confidence,
                        "value": result.decoded.to_json(),
                    }))?,
                }),
                None => {
                    info!("No type cleared the confidence floor {}", min_confidence);
                    Ok(match format {
                        OutputFormat::Text => "# no matching type".to_string(),
                        OutputFormat::Json => pretty(&JsonValue::Null)?,
                    })
                }
            }
        }

        Command::Inspect {
            input,
            schema,
            type_name,
            mapping,
            row,
        } => {
            let registry = load_descriptors(schema)?;
            let data = read_input(input)?;

            let mut request = InspectRequest::new();
            if !registry.names().is_empty() {
                request = request.descriptor(select_descriptor(&registry, schema.name.as_deref())?);
            }
            if let Some(type_name) = type_name {
                request = request.manual_type(type_name.as_str());
            }
            if let (Some(mapping), Some(row)) = (mapping, row) {
                request = request.mapping(read_mapping(mapping)?, read_row(row)?);
            }

            match Inspector::new(&registry).inspect(&data, &request) {
                Ok(inspection) => render_inspection(&inspection, format),
                Err(e) => {
                    if e.is_recoverable() {
                        eprintln!("{}", hex_dump(&data));
                    }
                    Err(e).context("Inspection failed")
                }
            }
        }
    }
}

/// Read the blob from a file or base64 text
fn read_input(input: &InputArgs) -> Result<Vec<u8>> {
    if let Some(ref path) = input.file {
        trace!("Reading {}", path.display());
        let data = fs::read(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        debug!("Read {} bytes from {}", data.len(), path.display());
        Ok(data)
    } else if let Some(ref text) = input.base64 {
        decode_base64(text).context("Failed to decode base64 input")
    } else {
        bail!("Either --file or --base64 must be specified")
    }
}

/// Load every descriptor set named on the command line
fn load_descriptors(schema: &SchemaArgs) -> Result<DescriptorRegistry> {
    let registry = DescriptorRegistry::new();

    for path in &schema.descriptors {
        load_descriptor(&registry, path)?;
    }

    if let Some(ref directory) = schema.descriptor_dir {
        if !directory.is_dir() {
            bail!("Path is not a directory: {}", directory.display());
        }
        info!("Scanning directory: {}", directory.display());

        for entry in WalkDir::new(directory)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || !is_descriptor_file(path) {
                trace!("Skipping {}", path.display());
                continue;
            }
            if let Err(e) = load_descriptor(&registry, path) {
                // Log error but continue with other files
                warn!("Error loading {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(registry)
}

fn load_descriptor(registry: &DescriptorRegistry, path: &Path) -> Result<()> {
    let data = fs::read(path)
        .with_context(|| format!("Failed to read descriptor: {}", path.display()))?;
    let name = descriptor_name(path);
    let report = registry
        .load(name.clone(), &data)
        .with_context(|| format!("Failed to load descriptor: {}", path.display()))?;

    if report.replaced {
        warn!("Descriptor name '{}' loaded twice; {} wins", name, path.display());
    }
    debug!(
        "Loaded {} as '{}': {} types, {} unusable, fingerprint {}",
        path.display(),
        name,
        report.message_count,
        report.unusable.len(),
        report.fingerprint
    );
    Ok(())
}

/// Registry name of a descriptor file: its file stem
fn descriptor_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("descriptor")
        .to_string()
}

fn is_descriptor_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false);
    if hidden {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DESCRIPTOR_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Pick the descriptor to work with
fn select_descriptor(registry: &DescriptorRegistry, requested: Option<&str>) -> Result<String> {
    let names = registry.names();
    match (requested, names.as_slice()) {
        (Some(name), _) if names.iter().any(|n| n == name) => Ok(name.to_string()),
        (Some(name), _) => bail!(
            "Descriptor '{}' is not loaded (available: {})",
            name,
            names.join(", ")
        ),
        (None, [only]) => Ok(only.clone()),
        (None, []) => bail!("No descriptors loaded (use --descriptor or --descriptor-dir)"),
        (None, _) => bail!(
            "Several descriptors loaded, choose one with --name ({})",
            names.join(", ")
        ),
    }
}

fn read_mapping(path: &Path) -> Result<ColumnTypeMapping> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid mapping: {}", path.display()))
}

fn read_row(path: &Path) -> Result<Map<String, JsonValue>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read row: {}", path.display()))?;
    match serde_json::from_str(&text).with_context(|| format!("Invalid row: {}", path.display()))? {
        JsonValue::Object(row) => Ok(row),
        _ => bail!("Row must be a JSON object: {}", path.display()),
    }
}

fn render_types(registry: &DescriptorRegistry, format: OutputFormat) -> Result<String> {
    let names = registry.names();
    match format {
        OutputFormat::Text => {
            let mut lines = Vec::new();
            for name in &names {
                let Some(entry) = registry.entry(name) else {
                    continue;
                };
                lines.push(format!("{} ({})", name, entry.fingerprint()));
                for type_name in entry.message_types() {
                    let usable = entry.message(type_name).map(|m| m.is_usable()).unwrap_or(false);
                    let marker = if usable { "" } else { " [unusable]" };
                    lines.push(format!("  {}{}", type_name, marker));
                }
            }
            Ok(lines.join("\n"))
        }
        OutputFormat::Json => {
            let map: Map<String, JsonValue> = names
                .iter()
                .map(|name| (name.clone(), json!(registry.message_types(name))))
                .collect();
            pretty(&JsonValue::Object(map))
        }
    }
}

fn render_ranking(ranked: &[CandidateScore], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(ranked
            .iter()
            .map(|c| {
                format!(
                    "{:>7.3}  {}  ({} decoded, {} unknown)",
                    c.score,
                    c.type_name,
                    c.stats.decoded(),
                    c.stats.unknown
                )
            })
            .collect::<Vec<_>>()
            .join("\n")),
        OutputFormat::Json => pretty(&JsonValue::Array(
            ranked
                .iter()
                .map(|c| {
                    json!({
                        "type": c.type_name,
                        "score": c.score,
                        "decoded": c.stats.decoded(),
                        "unknown": c.stats.unknown,
                        "superseded": c.stats.superseded,
                        "sanity_failures": c.stats.sanity_failures,
                    })
                })
                .collect(),
        )),
    }
}

fn render_inspection(inspection: &Inspection, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => {
            let header = match inspection.type_name() {
                Some(type_name) => format!("# {} [{}]", type_name, inspection.source),
                None => format!("# [{}]", inspection.source),
            };
            let body = inspection.render(&Formatter::new());
            if body.is_empty() {
                Ok(header)
            } else {
                Ok(format!("{}\n{}", header, body))
            }
        }
        OutputFormat::Json => pretty(&json!({
            "type": inspection.type_name(),
            "source": inspection.source.to_string(),
            "value": inspection.to_json(),
        })),
    }
}

fn pretty(value: &JsonValue) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
    use tempfile::TempDir;

    fn point_set() -> Vec<u8> {
        let field = |name: &str, number: i32| FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(Type::Int32 as i32),
            ..Default::default()
        };
        FileDescriptorSet {
            file: vec![FileDescriptorProto {
                name: Some("geo.proto".to_string()),
                package: Some("geo".to_string()),
                message_type: vec![DescriptorProto {
                    name: Some("Point".to_string()),
                    field: vec![field("x", 1), field("y", 2)],
                    ..Default::default()
                }],
                syntax: Some("proto3".to_string()),
                ..Default::default()
            }],
        }
        .encode_to_vec()
    }

    fn schema_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("geo.desc"), point_set()).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/more.binpb"), point_set()).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a descriptor").unwrap();
        fs::write(dir.path().join(".hidden.pb"), point_set()).unwrap();
        fs::write(dir.path().join("broken.pb"), b"\xff\xff\xff").unwrap();
        dir
    }

    fn schema_args(dir: &Path, name: Option<&str>) -> SchemaArgs {
        SchemaArgs {
            descriptors: vec![],
            descriptor_dir: Some(dir.to_path_buf()),
            name: name.map(str::to_string),
        }
    }

    fn base64_input(text: &str) -> InputArgs {
        InputArgs {
            file: None,
            base64: Some(text.to_string()),
        }
    }

    #[test]
    fn test_load_descriptor_dir() {
        let dir = schema_dir();
        let registry = load_descriptors(&schema_args(dir.path(), None)).unwrap();
        assert_eq!(registry.names(), vec!["geo".to_string(), "more".to_string()]);
        assert_eq!(registry.message_types("geo"), vec!["geo.Point".to_string()]);
    }

    #[test]
    fn test_explicit_descriptor_errors_are_fatal() {
        let dir = schema_dir();
        let args = SchemaArgs {
            descriptors: vec![dir.path().join("broken.pb")],
            descriptor_dir: None,
            name: None,
        };
        assert!(load_descriptors(&args).is_err());
    }

    #[test]
    fn test_select_descriptor() {
        let dir = schema_dir();
        let registry = load_descriptors(&schema_args(dir.path(), None)).unwrap();
        assert!(select_descriptor(&registry, None).is_err());
        assert_eq!(select_descriptor(&registry, Some("geo")).unwrap(), "geo");
        assert!(select_descriptor(&registry, Some("nope")).is_err());
        assert!(select_descriptor(&DescriptorRegistry::new(), None).is_err());
    }

    #[test]
    fn test_is_descriptor_file() {
        assert!(is_descriptor_file(Path::new("/tmp/app.desc")));
        assert!(is_descriptor_file(Path::new("/tmp/app.PROTOSET")));
        assert!(!is_descriptor_file(Path::new("/tmp/app.proto")));
        assert!(!is_descriptor_file(Path::new("/tmp/.app.pb")));
        assert_eq!(descriptor_name(Path::new("/tmp/app.desc")), "app");
    }

    #[test]
    fn test_decode_command() {
        let dir = schema_dir();
        let command = Command::Decode {
            // 08 96 01 10 02
            input: base64_input("CJYBEAI="),
            schema: schema_args(dir.path(), Some("geo")),
            type_name: "geo.Point".to_string(),
        };
        assert_eq!(run(&command, OutputFormat::Text).unwrap(), "x: 150\ny: 2");
    }

    #[test]
    fn test_detect_and_inspect_commands() {
        let dir = schema_dir();
        let detect = Command::Detect {
            input: base64_input("CJYBEAI="),
            schema: schema_args(dir.path(), Some("geo")),
            min_confidence: 0.5,
            all: false,
        };
        assert_eq!(
            run(&detect, OutputFormat::Text).unwrap(),
            "# geo.Point (confidence 1.00)\nx: 150\ny: 2"
        );

        let inspect = Command::Inspect {
            input: base64_input("CJYBEAI="),
            schema: SchemaArgs {
                descriptors: vec![],
                descriptor_dir: None,
                name: None,
            },
            type_name: None,
            mapping: None,
            row: None,
        };
        assert_eq!(
            run(&inspect, OutputFormat::Text).unwrap(),
            "# [wire format]\n1: 150\n2: 2"
        );
    }

    #[test]
    fn test_inspect_with_mapping() {
        let dir = schema_dir();
        let mapping = dir.path().join("mapping.json");
        let row = dir.path().join("row.json");
        fs::write(
            &mapping,
            r#"{"sourceColumn": "kind", "valueToType": {"pt": "geo.Point"}}"#,
        )
        .unwrap();
        fs::write(&row, r#"{"kind": "pt", "payload": "CJYBEAI="}"#).unwrap();

        let command = Command::Inspect {
            input: base64_input("CJYBEAI="),
            schema: schema_args(dir.path(), Some("geo")),
            type_name: None,
            mapping: Some(mapping),
            row: Some(row),
        };
        assert_eq!(
            run(&command, OutputFormat::Text).unwrap(),
            "# geo.Point [mapped]\nx: 150\ny: 2"
        );
    }

    #[test]
    fn test_wire_command_json() {
        let command = Command::Wire {
            input: base64_input("CJYBEAI="),
        };
        let output = run(&command, OutputFormat::Json).unwrap();
        let value: JsonValue = serde_json::from_str(&output).unwrap();
        assert_eq!(value, json!({"1": 150, "2": 2}));
    }

    #[test]
    fn test_read_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, [0x08, 0x01]).unwrap();

        let from_file = InputArgs {
            file: Some(path),
            base64: None,
        };
        assert_eq!(read_input(&from_file).unwrap(), vec![0x08, 0x01]);
        assert_eq!(read_input(&base64_input("CAE=")).unwrap(), vec![0x08, 0x01]);
        assert!(read_input(&base64_input("")).is_err());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
