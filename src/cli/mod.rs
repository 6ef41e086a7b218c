//! LS-017: CLI subcommands — init, validate, graph, emit.

use crate::backends::{self, Backend};
use crate::core::{compiler, hasher, parser, types};
use clap::Subcommand;
use std::io::Read;
use std::path::{Path, PathBuf};

const STREAM_BUF_SIZE: usize = 65536;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stack file
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stack.yaml structure and compile it without emitting
    Validate {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,
    },

    /// Show the compiled resource graph in provisioning order
    Graph {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Print the graph as JSON
        #[arg(long)]
        json: bool,
    },

    /// Emit the provisioning document for a backend
    Emit {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Target backend
        #[arg(short, long, value_enum, default_value_t = Backend::Pulumi)]
        backend: Backend,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Write to stdout instead of a file
        #[arg(long)]
        stdout: bool,

        /// Fail if the existing document differs instead of writing it
        #[arg(long)]
        check: bool,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Graph { file, json } => cmd_graph(&file, json),
        Commands::Emit {
            file,
            backend,
            out_dir,
            stdout,
            check,
        } => cmd_emit(&file, backend, &out_dir, stdout, check),
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let stack_path = path.join("stack.yaml");
    if stack_path.exists() {
        return Err(format!("{} already exists", stack_path.display()));
    }

    let template = r#"name: my-stack
description: "Managed by lakestack"

settings:
  workspace_root: /.laktory/

providers:
  databricks:
    host: ${var.DATABRICKS_HOST}
    token: ${var.DATABRICKS_TOKEN}

resources: {}
"#;
    std::fs::write(&stack_path, template)
        .map_err(|e| format!("cannot write {}: {}", stack_path.display(), e))?;

    println!("Initialized lakestack project at {}", path.display());
    println!("  Created: {}", stack_path.display());
    Ok(())
}

/// Parse and validate a stack file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<types::Stack, String> {
    let stack = parser::parse_stack_file(file).map_err(|e| e.to_string())?;
    let errors = parser::validate_stack(&stack);
    if errors.is_empty() {
        return Ok(stack);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn load_graph(file: &Path) -> Result<compiler::Graph, String> {
    let stack = parse_and_validate(file)?;
    compiler::compile(&stack).map_err(|e| format!("{} (stage: {})", e, e.stage()))
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let graph = load_graph(file)?;
    println!(
        "OK: {} ({} resources, {} edges, {} pipelines)",
        graph.name,
        graph.resources.len(),
        graph.edges.len(),
        graph.pipelines.len()
    );
    Ok(())
}

fn cmd_graph(file: &Path, json: bool) -> Result<(), String> {
    let graph = load_graph(file)?;
    if json {
        let out = serde_json::to_string_pretty(&graph)
            .map_err(|e| format!("JSON serialize error: {}", e))?;
        println!("{}", out);
        return Ok(());
    }

    println!("Graph: {} ({} resources)", graph.name, graph.resources.len());
    println!();
    for resource in &graph.resources {
        let deps = graph.dependencies(&resource.id);
        if deps.is_empty() {
            println!("  {} [{}]", resource.id, resource.kind);
        } else {
            println!("  {} [{}] <- {}", resource.id, resource.kind, deps.join(", "));
        }
    }
    for pipeline in &graph.pipelines {
        println!();
        println!("Pipeline: {} ({:?})", pipeline.name, pipeline.mode);
        for node in &pipeline.nodes {
            if node.upstream.is_empty() {
                println!("  {}", node.name);
            } else {
                println!("  {} <- {}", node.name, node.upstream.join(", "));
            }
        }
    }
    println!();
    let fingerprint = graph
        .fingerprint()
        .map_err(|e| format!("JSON serialize error: {}", e))?;
    println!("Fingerprint: {}", fingerprint);
    Ok(())
}

fn cmd_emit(
    file: &Path,
    backend: Backend,
    out_dir: &Path,
    stdout: bool,
    check: bool,
) -> Result<(), String> {
    let graph = load_graph(file)?;
    let document = backends::emit(&graph, backend).map_err(|e| e.to_string())?;
    let text = document.render().map_err(|e| e.to_string())?;

    if stdout {
        print!("{}", text);
        return Ok(());
    }

    let target = out_dir.join(document.file_name());
    let fingerprint = hasher::hash_string(&text);
    let unchanged = target.exists() && hash_file(&target)? == fingerprint;

    if check {
        if unchanged {
            println!("OK: {} is up to date ({})", target.display(), fingerprint);
            return Ok(());
        }
        return Err(format!("{} is out of date", target.display()));
    }
    if unchanged {
        println!("Unchanged: {}", target.display());
        return Ok(());
    }

    std::fs::create_dir_all(out_dir)
        .map_err(|e| format!("cannot create {}: {}", out_dir.display(), e))?;
    std::fs::write(&target, &text)
        .map_err(|e| format!("cannot write {}: {}", target.display(), e))?;
    println!(
        "Emitted: {} ({} resources, {})",
        target.display(),
        graph.resources.len(),
        fingerprint
    );
    Ok(())
}

/// Hash an existing document on disk. Returns `"blake3:{hex}"`.
fn hash_file(path: &Path) -> Result<String, String> {
    let mut file =
        std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| format!("read error {}: {}", path.display(), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}
