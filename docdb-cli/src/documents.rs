use anyhow::{Context, Result};
use clap::Parser;
use docdb_client::commands::{GetDocumentCommand, PutDocumentCommand};
use docdb_client::RequestExecutor;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Parser)]
pub struct Get {
    #[arg(help = "Id of the document")]
    pub id: String,
}

#[derive(Debug, Parser)]
#[command(after_help = PUT_EXAMPLES_TEXT)]
pub struct Put {
    #[arg(help = "Id of the document")]
    pub id: String,

    #[arg(long, short = 'j', conflicts_with = "file", help = "The document as inline JSON")]
    pub json: Option<String>,

    #[arg(long, short = 'f', help = "Read the document from a JSON file")]
    pub file: Option<PathBuf>,

    #[arg(long, help = "Only store if the document is still at this change vector")]
    pub change_vector: Option<String>,
}

const PUT_EXAMPLES_TEXT: &str = r#"
EXAMPLES:
    # Store an inline document
    docdb-cli put products/1 --json '{"Name":"Chai"}'

    # Store a document from a file, only if nobody changed it meanwhile
    docdb-cli put products/1 -f chai.json --change-vector A:5
"#;

pub async fn handle_get(executor: &RequestExecutor, args: Get) -> Result<()> {
    let mut command = GetDocumentCommand::new(args.id.clone());
    executor.execute(&mut command).await?;

    match command.result {
        Some(document) => println!("{}", serde_json::to_string_pretty(&document)?),
        None => eprintln!("document {} not found", args.id),
    }
    Ok(())
}

pub async fn handle_put(executor: &RequestExecutor, args: Put) -> Result<()> {
    let raw = match (&args.json, &args.file) {
        (Some(json), _) => json.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => return Err(anyhow::anyhow!("either --json or --file is required")),
    };
    let document: Value = serde_json::from_str(&raw).context("the document is not valid JSON")?;

    let mut command = PutDocumentCommand::new(args.id, document);
    if let Some(change_vector) = args.change_vector {
        command = command.with_expected_change_vector(change_vector);
    }
    executor.execute(&mut command).await?;

    let stored = command.result.context("the server returned no put result")?;
    println!("{}", serde_json::to_string_pretty(&stored)?);
    Ok(())
}
