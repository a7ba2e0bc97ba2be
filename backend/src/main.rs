//! smsbatch CLI - Compose bulk SMS batches from recipient files
//!
//! # Main Commands
//!
//! ```bash
//! smsbatch serve                          # Start HTTP server (port 3000)
//! smsbatch submit list.csv -t <template>  # Compose a batch, spool JSONL
//! smsbatch template list                  # Manage message templates
//! ```
//!
//! # Editor Commands
//!
//! ```bash
//! smsbatch preview -b "Hi {info1}, {URL}"   # Render with sample values
//! smsbatch measure "text"                   # Characters and segments
//! smsbatch normalize "{URL3} and {URL}"     # Renumber URL tags
//! smsbatch map list.csv                     # Debug: canonical rows as JSON
//! ```

use clap::{Parser, Subcommand};
use smsbatch::{
    append_url_tag, load_tag_defaults, measure, measure_text, normalize_url_tags,
    permissions_for, preview_render, BatchOptions, BatchPipeline, BatchReport,
    CallerPermissions, CancelToken, CanonicalRow, FileEncoding, FileKind, MessageSink,
    OutboundMessage, SchemaPlan, SendOptions, SmsLengthOptions, StaticPermissions,
    TagDefaultTable, Template, TemplateRegistry,
};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "smsbatch")]
#[command(about = "Compose bulk SMS batches from recipient files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose a batch and spool accepted messages as JSONL
    Submit {
        /// Recipient file (CSV or XLSX)
        input: PathBuf,

        /// Template id from the registry
        #[arg(short, long)]
        template: String,

        /// Text encoding: auto, utf-8, shift_jis
        #[arg(short, long, default_value = "auto")]
        encoding: String,

        /// File kind: csv, xlsx (inferred from the extension if omitted)
        #[arg(short, long)]
        kind: Option<String>,

        /// Account sends long SMS
        #[arg(long)]
        long_sms: bool,

        /// Sender number; its prefix picks the long-SMS limit
        #[arg(long, default_value = "")]
        sender: String,

        /// Subject id for the international-SMS permission check
        #[arg(long)]
        subject: Option<String>,

        /// Submit-level URL override, as SLOT=URL (repeatable)
        #[arg(long = "url", value_name = "SLOT=URL")]
        urls: Vec<String>,

        /// Spool file for accepted messages (default: <input>.jsonl)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Render a template preview with sample values
    Preview {
        /// Template id from the registry
        #[arg(short, long)]
        template: Option<String>,

        /// Inline template body (beats --template)
        #[arg(short, long)]
        body: Option<String>,

        /// Sample info value, as N=VALUE (e.g. --info 1=Alice)
        #[arg(long = "info", value_name = "N=VALUE")]
        infos: Vec<String>,

        /// Account sends long SMS
        #[arg(long)]
        long_sms: bool,

        /// Sender number; its prefix picks the long-SMS limit
        #[arg(long, default_value = "")]
        sender: String,
    },

    /// Count characters and billing segments of a text
    Measure {
        /// Text to measure; reads stdin when omitted
        text: Option<String>,

        /// Account sends long SMS
        #[arg(long)]
        long_sms: bool,

        /// Sender number; its prefix picks the long-SMS limit
        #[arg(long, default_value = "")]
        sender: String,
    },

    /// Renumber URL tags into first-use order
    Normalize {
        /// Body text; reads stdin when omitted
        body: Option<String>,
    },

    /// Parse a recipient file and print canonical rows as JSON
    Map {
        /// Recipient file (CSV or XLSX)
        input: PathBuf,

        /// Text encoding: auto, utf-8, shift_jis
        #[arg(short, long, default_value = "auto")]
        encoding: String,

        /// File kind: csv, xlsx (inferred from the extension if omitted)
        #[arg(short, long)]
        kind: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Manage message templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List stored templates with usage stats
    List,

    /// Create a template from a body
    Add {
        /// Template name
        name: String,

        /// Message body with tags
        #[arg(short, long)]
        body: String,

        /// Original URL for a slot, as SLOT=URL (repeatable)
        #[arg(long = "url", value_name = "SLOT=URL")]
        urls: Vec<String>,
    },

    /// Import a template JSON file
    Import {
        /// Template JSON file to import
        file: PathBuf,

        /// Name for the template (default: file stem)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Show a template's body, bindings, and length
    Show {
        /// Template id
        id: String,
    },

    /// Delete a template from the registry
    Delete {
        /// Template id
        id: String,
    },

    /// Append the next URL tag to a template body
    AddUrl {
        /// Template ID
        id: String,

        /// Original URL to bind to the new slot
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Submit {
            input,
            template,
            encoding,
            kind,
            long_sms,
            sender,
            subject,
            urls,
            output,
            json,
        } => {
            cmd_submit(
                &input,
                &template,
                &encoding,
                kind.as_deref(),
                long_sms,
                sender,
                subject.as_deref(),
                &urls,
                output,
                json,
            )
            .await
        }

        Commands::Preview { template, body, infos, long_sms, sender } => {
            cmd_preview(template.as_deref(), body.as_deref(), &infos, long_sms, &sender)
        }

        Commands::Measure { text, long_sms, sender } => cmd_measure(text, long_sms, &sender),

        Commands::Normalize { body } => cmd_normalize(body),

        Commands::Map { input, encoding, kind, output } => {
            cmd_map(&input, &encoding, kind.as_deref(), output.as_deref())
        }

        Commands::Serve { port } => cmd_serve(port).await,

        Commands::Template { action } => cmd_template(action),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

// =============================================================================
// JSONL Spool
// =============================================================================

/// Spools accepted messages as one JSON object per line.
struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self { writer: BufWriter::new(File::create(path)?) })
    }

    fn finish(mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl MessageSink for JsonlSink {
    fn accept(&mut self, message: OutboundMessage) -> std::io::Result<()> {
        let line = serde_json::to_string(&message)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        writeln!(self.writer, "{}", line)
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn cmd_submit(
    input: &Path,
    template_id: &str,
    encoding: &str,
    kind: Option<&str>,
    long_sms: bool,
    sender: String,
    subject: Option<&str>,
    urls: &[String],
    output: Option<PathBuf>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let encoding: FileEncoding = encoding.parse()?;
    let kind = kind.map(str::parse::<FileKind>).transpose()?;

    let mut registry = TemplateRegistry::new();
    let template = registry.get_template(template_id)?;
    let defaults = tag_defaults();

    let mut send = SendOptions {
        enable_long_sms: long_sms,
        sender_number: sender,
        ..Default::default()
    };
    for spec in urls {
        let (slot, url) = parse_indexed(spec)?;
        send.url_overrides.set(slot, url);
    }

    let permissions = match subject {
        Some(subject) => permissions_for(&StaticPermissions::from_env(), subject),
        None => CallerPermissions::default(),
    };

    let spool_path = output.unwrap_or_else(|| input.with_extension("jsonl"));
    let mut sink = JsonlSink::create(&spool_path)?;

    let pipeline = BatchPipeline {
        template: &template,
        defaults: &defaults,
        send,
        permissions,
        options: BatchOptions::from_env(),
    };

    let report = match pipeline
        .submit_file(input, encoding, kind, &mut sink, &CancelToken::new())
        .await
    {
        Ok(report) => report,
        Err(err) => {
            // Leave no half-written spool behind.
            drop(sink);
            let _ = fs::remove_file(&spool_path);
            return Err(err.into());
        }
    };
    sink.finish()?;

    if report.failed {
        let _ = fs::remove_file(&spool_path);
        eprintln!("🗑️  Spool deleted: batch failed");
    } else {
        registry.touch(template_id);
        eprintln!("💾 {} messages spooled to: {}", report.accepted_rows, spool_path.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.failed {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_preview(
    template_id: Option<&str>,
    body: Option<&str>,
    infos: &[String],
    long_sms: bool,
    sender: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let template = match body {
        Some(body) => Template::new("", "preview", body)?,
        None => {
            let id = template_id.ok_or("Pass --template <id> or --body <text>")?;
            TemplateRegistry::new().get_template(id)?
        }
    };

    let mut row = CanonicalRow::default();
    for spec in infos {
        let (index, value) = parse_indexed(spec)?;
        match index {
            1 => row.info1 = Some(value),
            2 => row.info2 = Some(value),
            3 => row.info3 = Some(value),
            4 => row.info4 = Some(value),
            _ => unreachable!("parse_indexed bounds the index"),
        }
    }

    let rendered = preview_render(&template, &row, &tag_defaults())?;
    let options = SmsLengthOptions::for_sender(long_sms, sender);
    let measured = measure(&rendered.text, &options);

    println!("{}", rendered.text);
    eprintln!();
    eprintln!("   Characters: {} / {}", measured.character_count, measured.limit);
    eprintln!("   Segments:   {}", measured.segment_count);
    for binding in &rendered.url_bindings {
        eprintln!("   {{URL{}}} → {}", binding.slot, binding.original_url);
    }
    if measured.exceeded {
        eprintln!("   ⚠️  Over the {} character limit", measured.limit);
    }

    Ok(())
}

fn cmd_measure(
    text: Option<String>,
    long_sms: bool,
    sender: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = match text {
        Some(text) => text,
        None => read_stdin()?,
    };

    let options = SmsLengthOptions::for_sender(long_sms, sender);
    let measured = measure_text(&text, &options);

    println!("{} characters, {} segment(s), limit {}",
        measured.character_count, measured.segment_count, measured.limit);

    if measured.exceeded {
        eprintln!("⚠️  Over the limit");
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_normalize(body: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let body = match body {
        Some(body) => body,
        None => read_stdin()?,
    };

    smsbatch::validate_body(&body)?;
    let normalized = normalize_url_tags(&body);
    if normalized == body {
        eprintln!("   Already normalized");
    }
    println!("{}", normalized);
    Ok(())
}

fn cmd_map(
    input: &Path,
    encoding: &str,
    kind: Option<&str>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing: {}", input.display());

    let encoding: FileEncoding = encoding.parse()?;
    let kind = kind.map(str::parse::<FileKind>).transpose()?;
    let parsed = smsbatch::parse_file(input, encoding, kind)?;

    eprintln!("   Encoding: {}", parsed.encoding);
    if let Some(delimiter) = parsed.delimiter {
        eprintln!("   Delimiter: '{}'", format_delimiter(delimiter));
    }
    eprintln!("   Columns: {}", parsed.headers.join(", "));

    let plan = SchemaPlan::from_headers(&parsed.headers)?;
    eprintln!("   Plan: {}", plan.describe());

    let rows: Vec<CanonicalRow> = parsed
        .into_rows()
        .map(|row| row.map(|raw| plan.map_row(&raw)))
        .collect::<Result<_, _>>()?;
    eprintln!("✅ Mapped {} rows", rows.len());

    let json = serde_json::to_string_pretty(&rows)?;
    write_output(&json, output)?;

    Ok(())
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

async fn cmd_serve(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    smsbatch::server::start_server(port).await
}

fn cmd_template(action: TemplateAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = TemplateRegistry::new();

    match action {
        TemplateAction::List => {
            let templates = registry.list();
            if templates.is_empty() {
                eprintln!("📋 No templates stored yet.");
                eprintln!("   Use 'smsbatch template add <name> --body <text>' to create one.");
                return Ok(());
            }

            eprintln!("📋 Stored templates ({}):\n", templates.len());
            for t in templates {
                println!("  📄 {} ({})", t.template.name, t.template.id);
                println!("     Body: {}", first_line(&t.template.body));
                for slot in 1..=4u8 {
                    if let Some(url) = t.template.url_slot(slot) {
                        println!("     URL{}: {}", slot, url);
                    }
                }
                println!("     Uses: {}", t.use_count);
                println!("     Created: {}", t.created_at);
                println!();
            }
        }

        TemplateAction::Add { name, body, urls } => {
            let mut template = Template::new("", &name, &body)?;
            for spec in &urls {
                let (slot, url) = parse_indexed(spec)?;
                template = template.with_url_slot(slot, url);
            }
            let id = registry.save(template)?;
            eprintln!("✅ Template saved with ID: {}", id);
        }

        TemplateAction::Import { file, name } => {
            eprintln!("📥 Importing template from: {}", file.display());
            let id = registry.import(&file, name.as_deref())?;
            eprintln!("✅ Template saved with ID: {}", id);
        }

        TemplateAction::Show { id } => match registry.get(&id) {
            Some(t) => {
                println!("📄 Template: {} ({})\n", t.template.name, t.template.id);
                println!("{}", t.template.body);
                println!();
                for slot in 1..=4u8 {
                    if let Some(url) = t.template.url_slot(slot) {
                        println!("URL{}: {}", slot, url);
                    }
                }
                let measured = measure_text(&t.template.body, &SmsLengthOptions::default());
                println!(
                    "Length: {} characters, {} segment(s)",
                    measured.character_count, measured.segment_count
                );
                println!("Created: {}", t.created_at);
                println!("Uses: {}", t.use_count);
            }
            None => {
                return Err(format!("Template not found: {}", id).into());
            }
        },

        TemplateAction::Delete { id } => {
            registry.delete(&id)?;
            eprintln!("🗑️  Template deleted: {}", id);
        }

        TemplateAction::AddUrl { id, url } => {
            let template = registry.get_template(&id)?;
            let (body, slot) = append_url_tag(&template.body)?;
            registry.update_body(&id, body, false)?;
            if let Some(url) = url {
                registry.set_url_slot(&id, slot, url)?;
            }
            eprintln!("✅ Added {{URL{}}} to {}", slot, id);
        }
    }

    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

/// Parse a "N=VALUE" pair used by --url and --info.
fn parse_indexed(spec: &str) -> Result<(u8, String), Box<dyn std::error::Error>> {
    let (index, value) = spec
        .split_once('=')
        .ok_or_else(|| format!("Expected N=VALUE, got: {}", spec))?;
    let index: u8 = index
        .trim()
        .parse()
        .map_err(|_| format!("Bad index in: {}", spec))?;
    if !(1..=4).contains(&index) {
        return Err(format!("Index out of range (1-4): {}", spec).into());
    }
    Ok((index, value.to_string()))
}

fn print_report(report: &BatchReport) {
    eprintln!("\n📊 Batch report");
    eprintln!("   Total rows: {}", report.total_rows);
    eprintln!("   Accepted:   {}", report.accepted_rows);
    eprintln!("   Skipped:    {}", report.skipped_rows);
    eprintln!("   Rejected:   {}", report.rejected_count);
    if report.has_international_numbers {
        eprintln!("   International numbers present");
    }
    for rejected in report.rejected_rows.iter().take(5) {
        eprintln!("     - row {}: {}", rejected.row_index, rejected.reason);
    }
    if report.truncated_at_limit {
        eprintln!("     ... detail list truncated");
    }
    if report.failed {
        eprintln!("   ❌ Batch failed: nothing will be sent");
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Tag defaults from `SMSBATCH_TAG_DEFAULTS`, or the built-in table.
fn tag_defaults() -> TagDefaultTable {
    match std::env::var("SMSBATCH_TAG_DEFAULTS") {
        Ok(path) => load_tag_defaults(Path::new(&path)).unwrap_or_default(),
        Err(_) => TagDefaultTable::default(),
    }
}

fn read_stdin() -> std::io::Result<String> {
    use std::io::Read;
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
