use clap::{Args, Parser, Subcommand};
use pinpoint::config::EngineConfig;
use pinpoint::coord::{format_coords, format_distance, haversine, Coordinate};
use pinpoint::location::{
    AddressDetails, AddressStore, AddressTag, FixedDeviceLocation, GeocodingProvider, HybridSearch, JsonAddressStore,
    LoggingMap, NominatimGeocoder, PinDescription, Ports, SessionContext, SessionController,
};
use pinpoint::plus_code;
use pinpoint::server::{self, AppState};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Pinpoint v0.3 - pin-drag location resolution
///
/// Plus codes, reverse geocoding, hybrid address search and saved
/// delivery addresses. Results are printed as JSON on stdout.
///
/// Examples:
///   pinpoint encode --lat 12.9716 --lon 77.5946
///   pinpoint recover HXCV+JR --lat 12.97 --lon 77.59
///   pinpoint search "meet me near HXCV+JR" --lat 12.97 --lon 77.59
///   pinpoint pin --lat 12.9756 --lon 77.6066 --save --user u1 \
///       --house "Flat 4B" --name Asha --phone 9876543210
///   pinpoint serve --port 3000
#[derive(Parser)]
#[command(name = "pinpoint", version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.pinpoint/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Point {
    /// Latitude (-90 to 90).
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Longitude (-180 to 180).
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,
}

#[derive(Subcommand)]
enum Command {
    /// Plus code for a coordinate.
    Encode {
        #[command(flatten)]
        point: Point,
        /// Code digits: 10 (~14 m) or 11 (~3 m).
        #[arg(long, default_value_t = 10)]
        length: usize,
    },
    /// Cell of a full plus code.
    Decode { code: String },
    /// Drop leading digits for display.
    Shorten {
        code: String,
        #[arg(long)]
        prefix: Option<usize>,
    },
    /// Full code for an abbreviated one, nearest to a reference point.
    Recover {
        code: String,
        #[command(flatten)]
        point: Point,
    },
    /// Distance between two points.
    Distance {
        #[arg(long, allow_hyphen_values = true)]
        from_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        from_lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        to_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        to_lon: f64,
    },
    /// Address for a point.
    Reverse {
        #[command(flatten)]
        point: Point,
    },
    /// Text or plus-code search near a point.
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        #[command(flatten)]
        point: Point,
    },
    /// Place a pin, resolve it, and optionally save it.
    Pin(PinArgs),
    /// List a user's saved addresses, newest first.
    Addresses {
        #[arg(long)]
        user: String,
    },
    /// Delete a saved address.
    Delete { id: String },
    /// Run the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
}

#[derive(Args)]
struct PinArgs {
    /// Where to drop the pin.
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// Search and drop the pin on the first hit instead.
    #[arg(long, conflicts_with = "lat")]
    search: Option<String>,

    /// Map zoom when the pin is dropped.
    #[arg(long, default_value_t = 17.0)]
    zoom: f64,

    /// Device position, for seeding and the displacement warning.
    #[arg(long, allow_hyphen_values = true, requires = "gps_lon")]
    gps_lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true, requires = "gps_lat")]
    gps_lon: Option<f64>,

    /// Move the pin to the center of its plus-code cell.
    #[arg(long)]
    snap: bool,

    #[arg(long, default_value = "local")]
    user: String,

    /// Re-place an existing address instead of creating one.
    #[arg(long)]
    edit: Option<String>,

    /// Confirm and save the resolved address.
    #[arg(long)]
    save: bool,
    #[arg(long, required_if_eq("save", "true"))]
    house: Option<String>,
    #[arg(long, required_if_eq("save", "true"))]
    name: Option<String>,
    #[arg(long, required_if_eq("save", "true"))]
    phone: Option<String>,
    /// Home, Work, or any custom label.
    #[arg(long)]
    tag: Option<String>,
    #[arg(long)]
    landmark: Option<String>,
    /// Override the area derived from the pin.
    #[arg(long)]
    area: Option<String>,
}

#[derive(Serialize)]
struct CodeOutput {
    code: String,
    short: String,
    center: Coordinate,
    formatted_coords: String,
}

#[derive(Serialize)]
struct DistanceOutput {
    meters: f64,
    label: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if matches!(cli.command, Command::Serve { .. }) { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::load(cli.config.as_deref()).unwrap_or_else(|e| fail(e));

    match cli.command {
        Command::Encode { point, length } => {
            let coord = coordinate(point.lat, point.lon);
            let code = plus_code::encode_with_length(coord, length).unwrap_or_else(|e| fail(e));
            print_json(&code_output(&code, config.session.short_code_prefix));
        }
        Command::Decode { code } => {
            let area = plus_code::decode(&code).unwrap_or_else(|e| fail(e));
            print_json(&area);
        }
        Command::Shorten { code, prefix } => {
            let prefix = prefix.unwrap_or(config.session.short_code_prefix);
            let short = plus_code::shorten(&code, prefix).unwrap_or_else(|e| fail(e));
            println!("{}", short);
        }
        Command::Recover { code, point } => {
            let full = plus_code::recover_nearest(&code, coordinate(point.lat, point.lon)).unwrap_or_else(|e| fail(e));
            print_json(&code_output(&full, config.session.short_code_prefix));
        }
        Command::Distance { from_lat, from_lon, to_lat, to_lon } => {
            let meters = haversine(coordinate(from_lat, from_lon), coordinate(to_lat, to_lon));
            print_json(&DistanceOutput { meters, label: format_distance(meters) });
        }
        Command::Reverse { point } => {
            let coord = coordinate(point.lat, point.lon);
            let geocoder = NominatimGeocoder::new(config.nominatim.clone());
            let result = geocoder.reverse_geocode(coord).await.unwrap_or_else(|e| fail(e));
            let pin = PinDescription::from_result(
                &result,
                coord,
                config.session.code_length,
                config.session.short_code_prefix,
            )
            .unwrap_or_else(|e| fail(e));
            eprintln!("  \u{1F4CD} {}  ({})", pin.title, pin.grid_code_short);
            print_json(&pin);
        }
        Command::Search { query, point } => {
            let search = HybridSearch::new(Arc::new(NominatimGeocoder::new(config.nominatim.clone())));
            let results = search
                .resolve(&query.join(" "), coordinate(point.lat, point.lon))
                .await
                .unwrap_or_else(|e| fail(e));
            if results.is_empty() {
                eprintln!("  No results.");
            }
            print_json(&results);
        }
        Command::Pin(args) => run_pin(args, &config).await,
        Command::Addresses { user } => {
            let store = open_store(&config);
            let list = store.list(&user).await.unwrap_or_else(|e| fail(e));
            print_json(&list);
        }
        Command::Delete { id } => {
            let store = open_store(&config);
            store.delete(&id).await.unwrap_or_else(|e| fail(e));
            eprintln!("  Deleted {}", id);
        }
        Command::Serve { host, port } => {
            let state = Arc::new(AppState::new(
                config.clone(),
                Arc::new(NominatimGeocoder::new(config.nominatim.clone())),
                open_store(&config),
            ));
            if let Err(e) = server::start(&host, port, state).await {
                fail(format!("server on {}:{}: {}", host, port, e));
            }
        }
    }
}

async fn run_pin(args: PinArgs, config: &EngineConfig) {
    let store = open_store(config);
    let gps = match (args.gps_lat, args.gps_lon) {
        (Some(lat), Some(lon)) => Some(coordinate(lat, lon)),
        _ => None,
    };
    let editing = match &args.edit {
        Some(id) => {
            let list = store.list(&args.user).await.unwrap_or_else(|e| fail(e));
            let found = list.into_iter().find(|a| a.id.as_deref() == Some(id.as_str()));
            Some(found.unwrap_or_else(|| fail(format!("no address '{}' for user '{}'", id, args.user))))
        }
        None => None,
    };

    let ports = Ports {
        geocoder: Arc::new(NominatimGeocoder::new(config.nominatim.clone())),
        device: Arc::new(FixedDeviceLocation::new(gps)),
        map: Arc::new(LoggingMap),
        store,
    };
    let context = SessionContext { user_id: args.user.clone(), previous_center: None, editing };
    let controller = SessionController::new(config.session.clone(), context, ports);

    settle(controller.start().await).await;

    if let Some(query) = &args.search {
        settle(controller.on_search_input(query)).await;
        let results = controller.search_results();
        let first = results.first().unwrap_or_else(|| fail(format!("no results for '{}'", query)));
        eprintln!("  \u{1F50D} {}", first.display_name);
        settle(controller.select_search_result(first)).await;
    } else if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        let target = coordinate(lat, lon);
        controller.on_pan(target, args.zoom);
        settle(controller.on_pan_end(target, args.zoom)).await;
    }

    if args.snap {
        settle(controller.snap_to_grid()).await;
    }

    let view = controller.view();
    let c = &view.candidate;
    eprintln!("  \u{1F4CD} {}", c.title);
    eprintln!("     {}", c.address_line);
    eprintln!("     {}", format_coords(c.coordinate.latitude, c.coordinate.longitude));
    if view.displacement_warning_active {
        if let Some(label) = &view.displacement_label {
            eprintln!("  \u{26A0}\u{FE0F}  Pin is {} from your location", label);
        }
    }
    if view.below_zoom_threshold {
        eprintln!("  Zoom in to confirm the pin.");
    }
    print_json(&view);

    if args.save {
        let details = AddressDetails {
            tag: args.tag.as_deref().map(AddressTag::from_label),
            house_or_flat: args.house.unwrap_or_default(),
            area_or_road: args.area,
            landmark: args.landmark,
            contact_name: args.name.unwrap_or_default(),
            contact_phone: args.phone.unwrap_or_default(),
        };
        let saved = controller.confirm(details).await.unwrap_or_else(|e| fail(e));
        eprintln!("  Saved as {}", saved.id.as_deref().unwrap_or("?"));
        print_json(&saved);
    }
}

async fn settle(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "background task failed");
        }
    }
}

fn open_store(config: &EngineConfig) -> Arc<JsonAddressStore> {
    let path = config.store.resolved_path();
    Arc::new(JsonAddressStore::load_from(path).unwrap_or_else(|e| fail(e)))
}

fn coordinate(lat: f64, lon: f64) -> Coordinate {
    Coordinate::new(lat, lon).unwrap_or_else(|e| fail(format!("Invalid coordinates: {}", e)))
}

fn code_output(code: &str, prefix: usize) -> CodeOutput {
    let area = plus_code::decode(code).unwrap_or_else(|e| fail(e));
    let center = area.center();
    CodeOutput {
        code: code.to_string(),
        short: plus_code::shorten(code, prefix).unwrap_or_else(|e| fail(e)),
        center,
        formatted_coords: format_coords(center.latitude, center.longitude),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", e);
    std::process::exit(1);
}
