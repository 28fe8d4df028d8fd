// mod.rs - Run drivers: calculator, simulation, threshold sweep

pub mod calculator;
pub mod simulation;
pub mod sweep;

pub use calculator::{Calculator, CalculatorConfig, CodeChange, RunReport, StateLayout};
pub use simulation::{
    arrival_order, distance_matrix_for, Simulation, SimulationReport, DEFAULT_CHUNK_SIZE,
};
pub use sweep::{run_sweep, LevelSpec, SweepConfig, SweepGrid, SweepResult, SweepSummary};
