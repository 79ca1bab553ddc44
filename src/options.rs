use crate::Variant;

use clap::Parser;
use gtmatrix::MatrixConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct GtmCli {
    /// number of group members, defaults to one per block
    #[arg(short, long, env = "GTM_MEMBERS")]
    pub members: Option<usize>,

    #[arg(short, long, default_value_t = 1000)]
    pub rows: usize,

    #[arg(short, long, default_value_t = 1000)]
    pub cols: usize,

    #[arg(long, default_value_t = 2)]
    pub row_blocks: usize,

    #[arg(long, default_value_t = 2)]
    pub col_blocks: usize,

    #[arg(short, long, default_value_t = 3)]
    pub iterations: usize,

    /// side of each square update panel
    #[arg(short = 'w', long, default_value_t = 8)]
    pub panel_width: usize,

    /// panels accumulated per member per iteration
    #[arg(short, long, default_value_t = 1000)]
    pub updates: usize,

    #[arg(value_enum, short, long, num_args(0..))]
    pub variants: Option<Vec<Variant>>,

    /// directory for the JSON-lines run record
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// print the whole matrix before and after symmetrizing
    #[arg(short, long, default_value_t = false)]
    pub print: bool,
}

impl GtmCli {
    pub fn members(&self) -> usize {
        self.members.unwrap_or(self.row_blocks * self.col_blocks)
    }

    pub fn config(&self) -> MatrixConfig {
        MatrixConfig::uniform(self.rows, self.cols, self.row_blocks, self.col_blocks)
    }

    pub fn variants(&self) -> Vec<Variant> {
        match &self.variants {
            Some(v) => v.clone(),
            None => vec![
                Variant::Symmetrize,
                Variant::ImmediateUpdate,
                Variant::BatchedUpdate,
            ],
        }
    }

    pub fn panel_elements(&self) -> usize {
        self.panel_width.min(self.rows) * self.panel_width.min(self.cols)
    }

    pub fn describe(&self) {
        println!("members: {}", self.members());
        println!("matrix: {} x {}", self.rows, self.cols);
        println!("block grid: {} x {}", self.row_blocks, self.col_blocks);
        println!("iterations: {}", self.iterations);
        println!("panel width: {}", self.panel_width);
        println!("updates per member: {}", self.updates);
        println!("variants: {:?}", self.variants());
    }
}
