use clap::{Parser, Subcommand};
use m6e_rs::{init_logger, log_info, NativeTransport, Param, ParamValue, ReaderError, SerialReader};

#[derive(Parser)]
#[command(name = "m6e-cli")]
#[command(about = "CLI tool for ThingMagic M5e/M6e readers")]
struct Cli {
    /// Reader URI, e.g. tmr:///dev/ttyUSB0
    uri: String,

    #[arg(short, long, default_value = "115200")]
    baudrate: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a timed inventory and print every tag seen
    Read {
        #[arg(short, long, default_value = "500")]
        timeout_ms: u32,
    },
    /// Print version and model information
    Version,
    /// Print the module temperature
    Temperature,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();

    let transport = NativeTransport::new(&cli.uri, cli.baudrate);
    let mut reader = SerialReader::new(transport);
    reader
        .param_set(Param::BaudRate, ParamValue::U32(cli.baudrate))
        .await?;
    reader.connect().await?;
    log_info("Connected to reader");

    match cli.command {
        Commands::Read { timeout_ms } => {
            let count = reader.read(timeout_ms).await?;
            println!("{count} tags found");
            while reader.has_more_tags().await? {
                let tag = reader.get_next_tag().await?;
                println!(
                    "{} antenna={} reads={} rssi={}",
                    tag.tag.epc_hex(),
                    tag.antenna,
                    tag.read_count,
                    tag.rssi
                );
            }
        }
        Commands::Version => {
            let model = reader.param_get(Param::VersionModel).await?;
            let software = reader.param_get(Param::VersionSoftware).await?;
            if let (ParamValue::String(model), ParamValue::String(software)) = (model, software) {
                println!("{model} {software}");
            }
        }
        Commands::Temperature => {
            match reader.param_get(Param::RadioTemperature).await? {
                ParamValue::U8(temp) => println!("{temp} C"),
                _ => return Err(ReaderError::Unimplemented.into()),
            }
        }
    }

    reader.destroy().await?;
    Ok(())
}
