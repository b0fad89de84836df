use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use hydra_studio::codec::read_upload;
use hydra_studio::settings::{load_settings_from_dir, save_settings_to_dir};
use hydra_studio::utils::ensure_data_dir;
use hydra_studio::{
    init_tracing, open_studio, AspectRatio, CreateFunction, EditFunction, Mode, Slot, Studio,
};

#[derive(Debug, Parser)]
#[command(name = "hydra-studio", version, about = "Create and edit images with Imagen and Gemini")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a new image from a prompt.
    Create {
        #[arg(long, value_enum, default_value_t = CreateArg::Free)]
        function: CreateArg,
        #[arg(long, default_value = "1:1")]
        aspect: AspectRatio,
        #[arg(long, default_value = ".")]
        out: PathBuf,
        prompt: String,
    },
    /// Edit an image on disk.
    Edit {
        #[arg(long)]
        image: PathBuf,
        /// Second source image, used by `--function compose`.
        #[arg(long)]
        second: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = EditArg::AddRemove)]
        function: EditArg,
        #[arg(long, default_value = ".")]
        out: PathBuf,
        prompt: String,
    },
    /// Re-edit a result from history.
    Refine {
        #[arg(long)]
        from: i64,
        #[arg(long, default_value = ".")]
        out: PathBuf,
        prompt: String,
    },
    #[command(subcommand)]
    History(HistoryCommand),
    /// Show saved settings, or change the ones given.
    Config {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        download_prefix: Option<String>,
        #[arg(long)]
        compact_layout: Option<bool>,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    List,
    Clear {
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CreateArg {
    Free,
    Sticker,
    Text,
    Comic,
}

impl From<CreateArg> for CreateFunction {
    fn from(arg: CreateArg) -> Self {
        match arg {
            CreateArg::Free => CreateFunction::Free,
            CreateArg::Sticker => CreateFunction::Sticker,
            CreateArg::Text => CreateFunction::Text,
            CreateArg::Comic => CreateFunction::Comic,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EditArg {
    AddRemove,
    Retouch,
    Style,
    Compose,
}

impl From<EditArg> for EditFunction {
    fn from(arg: EditArg) -> Self {
        match arg {
            EditArg::AddRemove => EditFunction::AddRemove,
            EditArg::Retouch => EditFunction::Retouch,
            EditArg::Style => EditFunction::Style,
            EditArg::Compose => EditFunction::Compose,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = ensure_data_dir()?;
    let _guard = init_tracing(&data_dir)?;

    match cli.command {
        Command::Config {
            api_key,
            download_prefix,
            compact_layout,
        } => configure(&data_dir, api_key, download_prefix, compact_layout),
        command => run(command, &data_dir).await,
    }
}

async fn run(command: Command, data_dir: &Path) -> Result<()> {
    let mut studio = open_studio(data_dir).await?;

    match command {
        Command::Create {
            function,
            aspect,
            out,
            prompt,
        } => {
            studio.switch_create_function(function.into())?;
            studio.set_aspect_ratio(aspect);
            studio.set_prompt(prompt);
            generate_and_save(&mut studio, &out).await
        }
        Command::Edit {
            image,
            second,
            function,
            out,
            prompt,
        } => {
            studio.switch_mode(Mode::Edit);
            studio.switch_edit_function(function.into())?;
            studio.set_image_slot(Slot::First, Some(read_upload(&image)?))?;
            if let Some(second) = second {
                studio.set_image_slot(Slot::Second, Some(read_upload(&second)?))?;
            }
            studio.set_prompt(prompt);
            generate_and_save(&mut studio, &out).await
        }
        Command::Refine { from, out, prompt } => {
            studio.select_from_history(from)?;
            studio.request_edit(prompt)?;
            generate_and_save(&mut studio, &out).await
        }
        Command::History(HistoryCommand::List) => {
            let history = &studio.state().history;
            if history.is_empty() {
                println!("history is empty");
            }
            for entry in history {
                println!(
                    "{}  {}  {}x{}  {} KB",
                    entry.id, entry.created_at, entry.width, entry.height, entry.size_kb
                );
            }
            Ok(())
        }
        Command::History(HistoryCommand::Clear { yes }) => {
            studio
                .clear_history(|| yes || confirm("Clear history? This cannot be undone."))
                .await?;
            println!("history cleared");
            Ok(())
        }
        Command::Config { .. } => Ok(()),
    }
}

fn configure(
    data_dir: &Path,
    api_key: Option<String>,
    download_prefix: Option<String>,
    compact_layout: Option<bool>,
) -> Result<()> {
    let mut settings = load_settings_from_dir(data_dir);
    let changed = api_key.is_some() || download_prefix.is_some() || compact_layout.is_some();
    if let Some(key) = api_key {
        settings.gemini_api_key = Some(key).filter(|k| !k.trim().is_empty());
    }
    if download_prefix.is_some() {
        settings.download_prefix = download_prefix;
    }
    if compact_layout.is_some() {
        settings.compact_layout = compact_layout;
    }
    if changed {
        let path = save_settings_to_dir(data_dir, &settings)?;
        println!("saved {}", path.display());
    }

    let key = if settings.api_key().is_some() { "set" } else { "missing" };
    println!("api key:         {key}");
    println!("base url:        {}", settings.base_url());
    println!("create model:    {}", settings.create_model());
    println!("edit model:      {}", settings.edit_model());
    println!("download prefix: {}", settings.download_prefix());
    println!("compact layout:  {}", settings.compact_layout());
    Ok(())
}

async fn generate_and_save(studio: &mut Studio, out: &Path) -> Result<()> {
    let entry = studio.request_generation().await?;
    tokio::fs::create_dir_all(out).await?;
    let path = studio.download(out).await?;
    println!(
        "#{}  {}x{}  {} KB  -> {}",
        entry.id,
        entry.width,
        entry.height,
        entry.size_kb,
        path.display()
    );
    Ok(())
}

fn confirm(question: &str) -> bool {
    print!("{question} [y/N] ");
    io::stdout().flush().ok();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}
