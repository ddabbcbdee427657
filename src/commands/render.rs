use std::time::Instant;

use clap::{arg, App, AppSettings, Arg};

use crate::commands::{load_config, parse_flag, Command};
use crate::render::{render, Classification, ColorClass, PeakOrder};

#[cfg(test)]
mod tests {
    use clap::ArgMatches;

    use super::Render;
    use crate::commands::Command;
    use crate::dem::write_geotiff;
    use crate::test::{gaussian_peak_grid, with_temp_dir};
    use image::GenericImageView;

    fn run(args: Vec<&str>) -> anyhow::Result<()> {
        let cmd = Render {};
        let matches: ArgMatches = cmd.register().get_matches_from(args);
        cmd.run(&matches)
    }

    #[test]
    fn renders_a_png() {
        with_temp_dir(|dir| {
            let grid = gaussian_peak_grid(60, (30.0, 30.0), 1100.0, 8.0, 2, 20.0);
            let input = dir.join("region.tif");
            write_geotiff(&input, &grid, Some(32145)).unwrap();
            let output = dir.join("map.png");

            let res = run(vec![
                "render",
                "--input",
                input.to_str().unwrap(),
                "--output",
                output.to_str().unwrap(),
                "--downsample",
                "2",
                "--width",
                "200",
                "--height",
                "150",
                "--scale",
                "1",
                "--class",
                "500:#F3EBDD",
                "--class",
                "800:#7E2A1E",
                "--peak-order",
                "scan",
            ]);

            assert!(res.is_ok(), "{:?}", res);
            let img = image::open(&output).unwrap();
            assert_eq!((img.width(), img.height()), (200, 150));
        });
    }

    #[test]
    fn bails_on_missing_input() {
        with_temp_dir(|dir| {
            let output = dir.join("map.png");
            let res = run(vec!["render", "--input", "/nonexistent/region.tif", "--output", output.to_str().unwrap()]);
            assert!(res.is_err());
            assert!(!output.exists());
        });
    }

    #[test]
    fn bails_on_unordered_classes() {
        let res = run(vec!["render", "--class", "900:#000000", "--class", "800:#FFFFFF"]);
        assert!(res.is_err());
    }

    #[test]
    fn bails_on_zero_downsample() {
        assert!(run(vec!["render", "--downsample", "0"]).is_err());
    }
}

pub struct Render {}

impl Command for Render {
    fn register(&self) -> App<'static> {
        App::new("render")
            .about("Render a classified, contoured and peak-annotated map of an extracted region.")
            .setting(AppSettings::AllowNegativeNumbers)
            .arg(arg!(-c --config [FILE] "JSON map configuration"))
            .arg(arg!(-i --input [FILE] "Extracted elevation GeoTIFF"))
            .arg(arg!(-o --output [FILE] "Path of the PNG to write"))
            .arg(arg!(-d --downsample [FACTOR] "Block size of the averaging downsample"))
            .arg(value_arg("min-elevation", "METRES", "Cells below this are left out of the map"))
            .arg(value_arg("interval", "METRES", "Contour interval"))
            .arg(value_arg("min-contour", "METRES", "Lowest contour level drawn"))
            .arg(
                value_arg("class", "THRESHOLD:COLOR", "Colour class like 780:#F3EBDD, repeat for each band")
                    .multiple_occurrences(true),
            )
            .arg(
                value_arg("peak-order", "ORDER", "Order in which peak candidates are accepted")
                    .possible_values(["elevation", "scan"]),
            )
            .arg(arg!(--width [PX] "Image width before scaling"))
            .arg(arg!(--height [PX] "Image height before scaling"))
            .arg(arg!(--scale [FACTOR] "Pixel density multiplier"))
    }

    fn run(&self, args: &clap::ArgMatches) -> anyhow::Result<()> {
        let start = Instant::now();

        let mut config = load_config(args)?;
        let r = &mut config.render;
        r.input = parse_flag(args, "input", r.input.clone())?;
        r.output = parse_flag(args, "output", r.output.clone())?;
        r.downsample = parse_flag(args, "downsample", r.downsample)?;
        r.min_elevation = parse_flag(args, "min-elevation", r.min_elevation)?;
        r.contour_interval = parse_flag(args, "interval", r.contour_interval)?;
        r.min_contour = parse_flag(args, "min-contour", r.min_contour)?;
        r.style.width = parse_flag(args, "width", r.style.width)?;
        r.style.height = parse_flag(args, "height", r.style.height)?;
        r.style.scale = parse_flag(args, "scale", r.style.scale)?;
        if let Some(classes) = args.values_of("class") {
            let classes = classes
                .map(|c| c.parse::<ColorClass>())
                .collect::<Result<Vec<_>, _>>()?;
            r.classification = Classification::new(classes)?;
        }
        match args.value_of("peak-order") {
            Some("scan") => r.peak_order = PeakOrder::ScanOrder,
            Some(_) => r.peak_order = PeakOrder::ElevationDescending,
            None => {}
        }
        config.validate()?;
        let r = &config.render;

        let mut now = Instant::now();
        println!("▶️  Loading and downsampling {} by {}", r.input.display(), r.downsample);
        let map = render(&r.input, r, |meta, grid| {
            println!(
                "✔️  Downsampled {}x{} px to {}x{} px in {}ms",
                meta.width,
                meta.height,
                grid.width(),
                grid.height(),
                now.elapsed().as_millis()
            );
            if let Some((min, max)) = grid.elevation_range() {
                println!("ℹ️  Raw elevation: {:.1}m - {:.1}m", min, max);
            }

            now = Instant::now();
            println!("▶️  Rendering map");
        })?;
        println!("✔️  Rendered map in {}ms", now.elapsed().as_millis());

        let (min, max) = map.elevation_range;
        println!("ℹ️  Elevation above {}m: {:.1}m - {:.1}m", r.min_elevation, min, max);
        println!(
            "ℹ️  {} contour levels ({} major), {} labels",
            map.levels.levels.len(),
            map.levels.major.len(),
            map.labels
        );
        for peak in &map.peaks {
            println!(
                "ℹ️  Peak at X={:.0}, Y={:.0} (cell {}, {}): {:.1}m",
                peak.x, peak.y, peak.col, peak.row, peak.elevation
            );
        }

        let now = Instant::now();
        println!("▶️  Writing {}", r.output.display());
        let bytes = map.save_png(&r.output)?;
        println!(
            "✔️  Wrote {:.1} MB in {}ms",
            bytes as f64 / 1e6,
            now.elapsed().as_millis()
        );

        println!("\n    🎉  Finished in {}ms", start.elapsed().as_millis());

        Ok(())
    }
}

fn value_arg(name: &'static str, value_name: &'static str, help: &'static str) -> Arg<'static> {
    Arg::new(name)
        .long(name)
        .takes_value(true)
        .value_name(value_name)
        .help(help)
}
