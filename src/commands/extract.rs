use std::time::Instant;

use clap::{arg, App, AppSettings};

use crate::commands::{load_config, parse_flag, Command};
use crate::dem::open_source;
use crate::extract::{extract, ExtractReport};
use crate::projection::GeoPoint;


pub struct Extract {}

impl Command for Extract {
    fn register(&self) -> App<'static> {
        App::new("extract")
            .about("Cut the region around a point out of a large, possibly remote, elevation GeoTIFF.")
            .setting(AppSettings::AllowNegativeNumbers)
            .arg(arg!(-c --config [FILE] "JSON map configuration"))
            .arg(arg!(-s --source [SOURCE] "Local path, http(s):// URL or /vsicurl/ path of the source raster"))
            .arg(arg!(-p --point [POINT] "Point of interest as <lat>,<lon> in degrees"))
            .arg(arg!(-b --buffer [METRES] "Half the side of the extracted square"))
            .arg(arg!(--crs [CRS] "Reference system of the source raster, e.g. EPSG:32145"))
            .arg(arg!(-o --output [FILE] "Path of the extracted BigTIFF"))
    }

    fn run(&self, args: &clap::ArgMatches) -> anyhow::Result<()> {
        let start = Instant::now();

        let mut config = load_config(args)?;
        let ex = &mut config.extract;
        ex.source = parse_flag(args, "source", ex.source.clone())?;
        ex.point = parse_flag(args, "point", ex.point)?;
        ex.buffer = parse_flag(args, "buffer", ex.buffer)?;
        ex.output = parse_flag(args, "output", ex.output.clone())?;
        if let Some(crs) = args.value_of("crs") {
            ex.crs = Some(crs.to_string());
        }
        config.validate()?;
        let ex = &config.extract;

        let now = Instant::now();
        println!("▶️  Opening {}", ex.source);
        let mut source = open_source(&ex.source)?;
        let meta = source.metadata().clone();
        println!(
            "✔️  Opened {}x{} px raster in {}ms",
            meta.width,
            meta.height,
            now.elapsed().as_millis()
        );

        let now = Instant::now();
        println!("▶️  Extracting region");
        let report = extract(source.as_mut(), ex.point, ex, &ex.output)?;
        println!("✔️  Extracted region in {}ms", now.elapsed().as_millis());

        print_point(&ex.point, &report);
        println!(
            "ℹ️  Zone: {:.1}km x {:.1}km",
            report.bbox.width() / 1000.0,
            report.bbox.height() / 1000.0
        );
        println!("ℹ️  Window: {}", report.window);
        if report.clipped {
            println!("ℹ️  Window clipped to the raster extent, region centred on {}", report.center);
        }
        println!("ℹ️  Raw size: {:.1} MB", report.raw_bytes() as f64 / 1e6);
        println!("ℹ️  File: {} ({:.1} MB)", report.path.display(), report.bytes as f64 / 1e6);
        if let Some(transfer) = source.transfer() {
            println!(
                "ℹ️  Downloaded {:.1} MB of the {:.1} MB source",
                transfer.downloaded as f64 / 1e6,
                transfer.total as f64 / 1e6
            );
        }

        match report.elevation_range {
            Some((min, max)) => {
                println!("ℹ️  Elevation: {:.1}m - {:.1}m", min, max);
                println!("ℹ️  Summit at {:.1}m", max);
            }
            None => println!("ℹ️  Region holds no valid elevation"),
        }

        println!("\n    🎉  Finished in {}ms", start.elapsed().as_millis());

        Ok(())
    }
}

fn print_point(point: &GeoPoint, report: &ExtractReport) {
    println!("ℹ️  Point of interest: {}", point);
    println!(
        "ℹ️  {}: X={:.0}, Y={:.0}",
        report.crs, report.planar.x, report.planar.y
    );
}
