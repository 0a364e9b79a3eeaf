//! eslmm - multimatrix convergence analysis CLI
//!
//! Fits sparse group lasso models over every species combination and
//! hyperparameter grid point and ranks genes by their contribution.

use clap::{Args, Parser, Subcommand};
use esl_multimatrix::data::{read_gene_list, AlignmentSet, Phenotypes};
use esl_multimatrix::error::{EslError, Result};
use esl_multimatrix::model::GroupPenaltyType;
use esl_multimatrix::pipeline::{
    write_cancelled_alignments, AnalysisConfig, CleanedAlignments, Multimatrix, MultimatrixInputs,
    NullMode, ResponseDirSource, ResponseMatrixSource, SpeciesGroupsSource,
};
use std::path::{Path, PathBuf};

/// Multimatrix evolutionary sparse learning for convergence analysis
#[derive(Parser)]
#[command(name = "eslmm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Where the alignments and combinations come from.
#[derive(Args, Debug, Clone)]
struct InputOpts {
    /// Directory of gene alignment files (.fas)
    #[arg(short, long)]
    alignments_dir: PathBuf,

    /// Species groups file: one comma-separated group per line
    #[arg(short, long, conflicts_with = "response_dir", required_unless_present = "response_dir")]
    species_groups: Option<PathBuf>,

    /// Directory of response files to use instead of a species groups file
    #[arg(long)]
    response_dir: Option<PathBuf>,

    /// Only load genes listed in this file (one file name per line)
    #[arg(long)]
    limited_genes_list: Option<PathBuf>,

    /// YAML analysis configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Gap cancellation flags.
#[derive(Args, Debug, Clone, Default)]
struct CancelOpts {
    /// Minimum number of ungapped pairs for a site to be kept
    #[arg(long)]
    min_pairs: Option<usize>,

    /// Mask only the gapped pair instead of removing the site
    #[arg(long)]
    cancel_only_partner: bool,

    /// Drop fully cancelled genes instead of keeping placeholders
    #[arg(long)]
    nix_full_deletions: bool,

    /// Outgroup species for outgroup-mismatch cancellation
    #[arg(long)]
    outgroup: Option<String>,

    /// Cancel tri-allelic sites (4-species combinations only)
    #[arg(long)]
    cancel_tri_allelic: bool,

    /// Treat species missing from an alignment as all gaps
    #[arg(long)]
    pad_missing_species: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a multimatrix analysis
    Run {
        #[command(flatten)]
        input: InputOpts,

        #[command(flatten)]
        cancel: CancelOpts,

        /// Alignments of prediction-only species
        #[arg(long)]
        prediction_alignments_dir: Option<PathBuf>,

        /// Species phenotype file (species,label)
        #[arg(long)]
        species_pheno: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Prefix of output file names
        #[arg(long, default_value = "esl")]
        output_base_name: String,

        /// Write cleaned alignments under this directory
        #[arg(long, conflicts_with = "use_existing_alignments")]
        canceled_alignments_dir: Option<PathBuf>,

        /// Reuse cleaned alignments previously written under this directory
        #[arg(long)]
        use_existing_alignments: Option<PathBuf>,

        #[arg(long)]
        initial_lambda1: Option<f64>,
        #[arg(long)]
        final_lambda1: Option<f64>,
        #[arg(long)]
        initial_lambda2: Option<f64>,
        #[arg(long)]
        final_lambda2: Option<f64>,
        #[arg(long)]
        lambda_step: Option<f64>,
        #[arg(long)]
        lambda2_step: Option<f64>,

        /// Use log-spaced lambda values
        #[arg(long)]
        use_logspace: bool,

        #[arg(long)]
        num_log_points: Option<usize>,

        /// Group penalty type: median, sqrt, linear or std
        #[arg(long)]
        group_penalty_type: Option<GroupPenaltyType>,

        #[arg(long)]
        initial_gp_value: Option<f64>,
        #[arg(long)]
        final_gp_value: Option<f64>,
        #[arg(long)]
        gp_step: Option<f64>,

        /// Fraction of genes counted as top genes per model
        #[arg(long)]
        top_rank_frac: Option<f64>,

        /// Minimum selected genes for a model's predictions to be written
        #[arg(long)]
        min_genes: Option<usize>,

        /// Also write the selected sites table
        #[arg(long)]
        show_selected_sites: bool,

        /// Fit every balanced response flip instead of the real responses
        #[arg(long, conflicts_with = "make_pair_randomized_null_models")]
        make_null_models: bool,

        /// Fit pair-randomized alignments instead of the real ones
        #[arg(long)]
        make_pair_randomized_null_models: bool,

        /// Number of pair-randomized alignments per combination
        #[arg(long)]
        num_randomized_alignments: Option<usize>,

        /// Random seed for pair randomization
        #[arg(long)]
        seed: Option<u64>,

        /// Checkpoint after every combination and resume a matching run
        #[arg(long)]
        checkpoint: bool,

        /// Discard an existing checkpoint and start over
        #[arg(long)]
        force_from_beginning: bool,

        /// Number of worker threads (default: all cores)
        #[arg(short, long)]
        threads: Option<usize>,
    },

    /// Write gap-cancelled alignments for every combination
    Cancel {
        #[command(flatten)]
        input: InputOpts,

        #[command(flatten)]
        cancel: CancelOpts,

        /// Directory receiving one <combo>-alignments folder per combination
        #[arg(short, long)]
        output_dir: PathBuf,
    },

    /// List the species combinations of a groups file
    Combos {
        /// Species groups file
        #[arg(short, long)]
        species_groups: PathBuf,

        /// Write one response file per combination into this directory
        #[arg(long)]
        response_dir: Option<PathBuf>,

        /// Combinations with more species than this get symbolic names
        #[arg(long, default_value_t = 16)]
        symbolic_name_threshold: usize,
    },

    /// Write a default YAML configuration
    ExampleConfig {
        /// Output path
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    let result = match cli.command {
        Commands::Run {
            input,
            cancel,
            prediction_alignments_dir,
            species_pheno,
            output_dir,
            output_base_name,
            canceled_alignments_dir,
            use_existing_alignments,
            initial_lambda1,
            final_lambda1,
            initial_lambda2,
            final_lambda2,
            lambda_step,
            lambda2_step,
            use_logspace,
            num_log_points,
            group_penalty_type,
            initial_gp_value,
            final_gp_value,
            gp_step,
            top_rank_frac,
            min_genes,
            show_selected_sites,
            make_null_models,
            make_pair_randomized_null_models,
            num_randomized_alignments,
            seed,
            checkpoint,
            force_from_beginning,
            threads,
        } => load_config(&input, &cancel).and_then(|mut config| {
            let grid = &mut config.grid;
            set(&mut grid.initial_lambda1, initial_lambda1);
            set(&mut grid.final_lambda1, final_lambda1);
            set(&mut grid.initial_lambda2, initial_lambda2);
            set(&mut grid.final_lambda2, final_lambda2);
            set(&mut grid.lambda_step, lambda_step);
            set(&mut grid.lambda2_step, lambda2_step);
            grid.use_logspace |= use_logspace;
            set(&mut grid.num_log_points, num_log_points);
            set(&mut grid.group_penalty_type, group_penalty_type);
            set(&mut grid.initial_gp_value, initial_gp_value);
            set(&mut grid.final_gp_value, final_gp_value);
            set(&mut grid.gp_step, gp_step);
            set(&mut config.top_rank_frac, top_rank_frac);
            set(&mut config.min_genes, min_genes);
            set(&mut config.num_randomized_alignments, num_randomized_alignments);
            set(&mut config.seed, seed);
            if make_null_models {
                config.null_mode = NullMode::ResponseFlip;
            } else if make_pair_randomized_null_models {
                config.null_mode = NullMode::PairRandomized;
            }
            let cleaned = match (canceled_alignments_dir, use_existing_alignments) {
                (_, Some(dir)) => CleanedAlignments::Reuse(dir),
                (Some(dir), None) => CleanedAlignments::Write(dir),
                (None, None) => CleanedAlignments::InMemory,
            };
            cmd_run(RunPlan {
                input,
                config,
                prediction_alignments_dir,
                species_pheno,
                output_dir,
                output_base_name,
                cleaned,
                show_selected_sites,
                checkpoint,
                force_from_beginning,
                threads,
            })
        }),

        Commands::Cancel {
            input,
            cancel,
            output_dir,
        } => cmd_cancel(&input, &cancel, &output_dir),

        Commands::Combos {
            species_groups,
            response_dir,
            symbolic_name_threshold,
        } => cmd_combos(&species_groups, response_dir.as_deref(), symbolic_name_threshold),

        Commands::ExampleConfig { output } => cmd_example_config(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Load the YAML configuration (or defaults) and apply cancellation flags.
fn load_config(input: &InputOpts, cancel: &CancelOpts) -> Result<AnalysisConfig> {
    let mut config = match &input.config {
        Some(path) => AnalysisConfig::from_file(path)?,
        None => AnalysisConfig::default(),
    };
    let policy = &mut config.cancel;
    set(&mut policy.min_pairs, cancel.min_pairs);
    policy.cancel_only_partner |= cancel.cancel_only_partner;
    policy.nix_full_deletions |= cancel.nix_full_deletions;
    policy.cancel_tri_allelic |= cancel.cancel_tri_allelic;
    policy.pad_missing_species |= cancel.pad_missing_species;
    if cancel.outgroup.is_some() {
        policy.outgroup_species = cancel.outgroup.clone();
    }
    Ok(config)
}

fn load_alignments(input: &InputOpts) -> Result<AlignmentSet> {
    let limited = match &input.limited_genes_list {
        Some(path) => Some(read_gene_list(path)?),
        None => None,
    };
    AlignmentSet::from_dir(&input.alignments_dir, limited.as_ref())
}

fn load_source(input: &InputOpts, config: &AnalysisConfig) -> Result<Box<dyn ResponseMatrixSource>> {
    match (&input.species_groups, &input.response_dir) {
        (Some(groups), _) => Ok(Box::new(SpeciesGroupsSource::from_file(
            groups,
            config.symbolic_name_threshold,
        )?)),
        (None, Some(dir)) => Ok(Box::new(ResponseDirSource::from_dir(dir)?)),
        (None, None) => Err(EslError::InvalidParameter(
            "either --species-groups or --response-dir is required".to_string(),
        )),
    }
}

struct RunPlan {
    input: InputOpts,
    config: AnalysisConfig,
    prediction_alignments_dir: Option<PathBuf>,
    species_pheno: Option<PathBuf>,
    output_dir: PathBuf,
    output_base_name: String,
    cleaned: CleanedAlignments,
    show_selected_sites: bool,
    checkpoint: bool,
    force_from_beginning: bool,
    threads: Option<usize>,
}

/// Run a full multimatrix analysis
fn cmd_run(plan: RunPlan) -> Result<()> {
    if let Some(n) = plan.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .map_err(|e| EslError::Pipeline(format!("cannot configure thread pool: {}", e)))?;
    }

    eprintln!("Loading alignments from {:?}...", plan.input.alignments_dir);
    let alignments = load_alignments(&plan.input)?;
    let source = load_source(&plan.input, &plan.config)?;
    let prediction_alignments = match &plan.prediction_alignments_dir {
        Some(dir) => Some(AlignmentSet::from_dir(dir, None)?),
        None => None,
    };
    let phenotypes = match &plan.species_pheno {
        Some(path) => Some(Phenotypes::from_file(path)?),
        None => None,
    };
    eprintln!(
        "Loaded {} alignments; {}",
        alignments.len(),
        source.describe()
    );

    let min_genes = plan.config.min_genes;
    let mut runner = Multimatrix::new(plan.config).with_cleaned_alignments(plan.cleaned);
    if plan.checkpoint {
        runner = runner.with_checkpoint(&plan.output_dir, plan.force_from_beginning);
    }
    let inputs = MultimatrixInputs {
        alignments,
        source,
        prediction_alignments,
        phenotypes,
    };
    let output = runner.run(&inputs)?;

    let n_full: usize = output.fully_cancelled.iter().map(|(_, n)| n).sum();
    if n_full > 0 {
        eprintln!("{} gene alignments fully cancelled across combinations", n_full);
    }
    let written = output.write(
        &plan.output_dir,
        &plan.output_base_name,
        min_genes,
        plan.show_selected_sites,
    )?;
    for path in &written {
        eprintln!("  wrote {:?}", path);
    }
    eprintln!(
        "Done! {} models over {} combinations ({} not converged)",
        output.aggregator.n_models(),
        output.aggregator.n_combinations(),
        output.aggregator.status_log().len()
    );
    Ok(())
}

/// Write gap-cancelled alignments for every combination
fn cmd_cancel(input: &InputOpts, cancel: &CancelOpts, output_dir: &Path) -> Result<()> {
    let config = load_config(input, cancel)?;
    let alignments = load_alignments(input)?;
    let source = load_source(input, &config)?;
    let counts = write_cancelled_alignments(&alignments, source.as_ref(), &config.cancel, output_dir)?;
    for (name, n_full) in &counts {
        println!("{}\t{} fully cancelled", name, n_full);
    }
    eprintln!("Wrote cleaned alignments for {} combinations to {:?}", counts.len(), output_dir);
    Ok(())
}

/// Print the combinations of a species groups file
fn cmd_combos(species_groups: &Path, response_dir: Option<&Path>, threshold: usize) -> Result<()> {
    let source = SpeciesGroupsSource::from_file(species_groups, threshold)?;
    eprintln!("{}", source.describe());
    for combo in source.combinations() {
        println!("{}\t{}", combo.name(), combo.species().join(","));
    }
    if let Some(dir) = response_dir {
        let combos: Vec<_> = source.combinations().collect();
        ResponseDirSource::write_response_files(dir, &combos)?;
        eprintln!("Wrote {} response files to {:?}", combos.len(), dir);
    }
    Ok(())
}

/// Write a default configuration
fn cmd_example_config(output: &Path) -> Result<()> {
    let yaml = AnalysisConfig::default().to_yaml()?;
    std::fs::write(output, yaml)?;
    eprintln!("Wrote default configuration to {:?}", output);
    Ok(())
}
