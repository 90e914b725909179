// src/bin/refine_layout.rs
//
// Developer diagnostic: geometry solver inspection, no field synthesis.
//
// Prints the per-level offsets and extents the solver produces for a box
// region, useful to eyeball padding/alignment behavior before a real run.
//
// Usage:
//   cargo run --bin refine_layout -- <levelmin> <levelmax> <cx> <cy> <cz> <extent>

use zoomgrid::config::{GeometryConfig, RegionConfig};
use zoomgrid::geometry::RefinementGeometry;
use zoomgrid::region::BoxRegion;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let (levelmin, levelmax, center, extent) = if args.len() == 7 {
        (
            args[1].parse::<u32>().expect("levelmin"),
            args[2].parse::<u32>().expect("levelmax"),
            [
                args[3].parse::<f64>().expect("cx"),
                args[4].parse::<f64>().expect("cy"),
                args[5].parse::<f64>().expect("cz"),
            ],
            args[6].parse::<f64>().expect("extent"),
        )
    } else {
        (6u32, 9u32, [0.35, 0.5, 0.6], 0.12f64)
    };

    let gcfg = GeometryConfig {
        levelmin,
        levelmax,
        ..Default::default()
    };
    let rcfg = RegionConfig {
        ref_center: Some(center),
        ref_extent: Some([extent, extent, extent]),
        ..Default::default()
    };

    let mut region =
        BoxRegion::new(&rcfg, levelmin, levelmax, gcfg.padding).expect("region config");
    let geom = RefinementGeometry::solve(&gcfg, &mut region).expect("geometry solve");

    println!(
        "Domain shift: ({}, {}, {}) coarse cells",
        geom.get_shift(0),
        geom.get_shift(1),
        geom.get_shift(2)
    );
    let mut total = 0i64;
    for level in geom.levelmin()..=geom.levelmax() {
        let n = geom.size(level, 0) * geom.size(level, 1) * geom.size(level, 2);
        total += n;
        println!(
            "level {:2}: offset_abs = ({:5}, {:5}, {:5}), size = ({:4}, {:4}, {:4})  [{} cells]",
            level,
            geom.offset_abs(level, 0),
            geom.offset_abs(level, 1),
            geom.offset_abs(level, 2),
            geom.size(level, 0),
            geom.size(level, 1),
            geom.size(level, 2),
            n
        );
    }
    println!("Total cells across refined levels: {}", total);
}
