//! Data-grid optimization demo: recover a checkerboard pattern from a
//! supervised two-attribute grid.
//!
//! Run: cargo run --example grid_optimization

use tb_core::RunContext;
use tb_grid::{build_initial_grid, CodelengthCostModel, GridColumn, GridCostModel, GridExporter};
use tb_solver::{DataGridOptimizer, GridOptimizationSpec};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("=== TABULA data-grid optimization ===");
    println!();

    // 2000 instances on a noisy 3x2 checkerboard
    let rows = 2000usize;
    let mut x = Vec::with_capacity(rows);
    let mut y = Vec::with_capacity(rows);
    let mut target = Vec::with_capacity(rows);
    for i in 0..rows {
        let xv = (i % 60) as f64;
        let yv = ((i / 60) % 30) as f64;
        let cell = (xv as usize / 20 + yv as usize / 15) % 2;
        // One instance in twenty flips class, so the pattern stays clean
        let flip = i % 20 == 0;
        let class = if flip { 1 - cell } else { cell };
        x.push(xv);
        y.push(yv);
        target.push(if class == 0 { "no".to_string() } else { "yes".to_string() });
    }
    let initial = build_initial_grid(
        &[
            GridColumn::Numeric {
                name: "X".into(),
                values: x,
            },
            GridColumn::Numeric {
                name: "Y".into(),
                values: y,
            },
        ],
        Some(&target),
    )
    .unwrap();

    let model = CodelengthCostModel::new();
    let terminal_cost = model.total_cost(&GridExporter::new(&initial).export_terminal());
    println!("Terminal grid cost: {terminal_cost:.2} nats");

    let mut spec = GridOptimizationSpec::default();
    spec.set_optimization_level(2).unwrap();
    let optimizer = DataGridOptimizer::new(spec);
    let mut ctx = RunContext::new(1);
    let result = optimizer.optimize(&initial, &mut ctx);

    println!("Optimized cost:     {:.2} nats", result.cost);
    println!(
        "Compression gain:   {:.1}%",
        100.0 * (terminal_cost - result.cost) / terminal_cost
    );
    println!();
    for attribute in result.grid.attributes() {
        println!(
            "Attribute {} -> {} parts (granularity {})",
            attribute.name(),
            attribute.part_count(),
            attribute.granularity()
        );
    }
    println!("Cells: {}", result.grid.cell_count());
}
