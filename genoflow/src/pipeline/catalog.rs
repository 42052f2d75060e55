//! The built-in genomics workflow and pipeline loading.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::adapters::{AdapterRegistry, CommandAdapter, SimulatedAdapter, TaskRunner};
use crate::config::{AdapterMode, OrchestratorConfig};
use crate::core::{PipelineDefinition, StageDefinition, TaskDefinition};
use crate::errors::DefinitionError;
use crate::pipeline::RetryPolicy;

/// Name of the built-in pipeline.
pub const GENOMICS_PIPELINE: &str = "host-parasite-te-analysis";

const REPEATMASKER_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

fn task(name: &str, adapter: &str, label: &str) -> TaskDefinition {
    TaskDefinition::new(name, adapter).with_label(label)
}

/// The six-stage host/parasite transposable-element workflow.
pub fn genomics_pipeline(retry: &RetryPolicy) -> Result<PipelineDefinition, DefinitionError> {
    let stages = vec![
        StageDefinition::new(0, "Genome Annotation & Quality Control")
            .with_description("Validating uploaded files and running quality control checks")
            .with_estimated_duration("5-10 minutes")
            .with_task(
                task("validate_fasta", "seqkit", "Validating FASTA format")
                    .with_optional_input("hostGenome")
                    .with_optional_input("parasiteGenome")
                    .with_output("fasta_report"),
            )
            .with_task(
                task("sequence_integrity", "seqkit", "Checking sequence integrity")
                    .with_input("fasta_report")
                    .with_output("integrity_report"),
            )
            .with_task(
                task("quality_metrics", "quast", "Generating quality metrics")
                    .with_optional_input("hostGenome")
                    .with_optional_input("parasiteGenome")
                    .with_output("qc_metrics"),
            )
            .with_task(
                task("genome_annotation", "augustus", "Creating genome annotations")
                    .with_optional_input("hostGenome")
                    .with_optional_input("parasiteGenome")
                    .with_output("genome_annotation"),
            ),
        StageDefinition::new(1, "RepeatMasker Analysis")
            .with_description("Identifying repeated sequences and transposable elements")
            .with_estimated_duration("15-30 minutes")
            .with_task(
                task("repeatmasker_host", "repeatmasker", "Running RepeatMasker on host genome")
                    .with_optional_input("hostGenome")
                    .with_output("host_repeats")
                    .with_timeout(REPEATMASKER_TIMEOUT)
                    .independent(),
            )
            .with_task(
                task(
                    "repeatmasker_parasite",
                    "repeatmasker",
                    "Running RepeatMasker on parasite genome",
                )
                .with_optional_input("parasiteGenome")
                .with_output("parasite_repeats")
                .with_timeout(REPEATMASKER_TIMEOUT)
                .independent(),
            )
            .with_task(
                task("classify_te_families", "te_classifier", "Classifying TE families")
                    .with_input("host_repeats")
                    .with_input("parasite_repeats")
                    .with_output("te_families"),
            )
            .with_task(
                task("repeat_annotations", "te_classifier", "Generating repeat annotations")
                    .with_input("te_families")
                    .with_output("repeat_annotation"),
            ),
        StageDefinition::new(2, "Transcriptome Processing")
            .with_description("Processing RNA-Seq data and quantifying gene expression")
            .with_estimated_duration("10-20 minutes")
            .with_task(
                task("rnaseq_qc", "fastqc", "Quality control of RNA-Seq data")
                    .with_optional_input("hostTranscriptome")
                    .with_optional_input("parasiteTranscriptome")
                    .with_output("rnaseq_qc"),
            )
            .with_task(
                task("salmon_quant", "salmon", "Salmon quantification")
                    .with_input("rnaseq_qc")
                    .with_optional_input("hostTranscriptome")
                    .with_optional_input("parasiteTranscriptome")
                    .with_output("quant"),
            )
            .with_task(
                task("deseq2", "deseq2", "DESeq2 differential expression analysis")
                    .with_input("quant")
                    .with_output("differential_expression"),
            )
            .with_task(
                task("expression_matrix", "deseq2", "Expression matrix generation")
                    .with_input("quant")
                    .with_output("expression_matrix"),
            ),
        StageDefinition::new(3, "TE Mapping & Target Gene Identification")
            .with_description("Mapping TEs to genomic locations and identifying target genes")
            .with_estimated_duration("5-10 minutes")
            .with_task(
                task("map_te_coordinates", "bedtools", "Mapping TEs to genome coordinates")
                    .with_input("repeat_annotation")
                    .with_output("te_coordinates"),
            )
            .with_task(
                task("genes_near_tes", "bedtools", "Identifying genes near TEs")
                    .with_input("te_coordinates")
                    .with_input("genome_annotation")
                    .with_output("te_neighbour_genes"),
            )
            .with_task(
                task("te_gene_distances", "bedtools", "Calculating TE-gene distances")
                    .with_input("te_neighbour_genes")
                    .with_output("te_gene_distances"),
            )
            .with_task(
                task("annotate_targets", "target_annotator", "Annotating target genes")
                    .with_input("te_gene_distances")
                    .with_input("expression_matrix")
                    .with_output("target_genes"),
            ),
        StageDefinition::new(4, "Structure Prediction & Functional Analysis")
            .with_description("Predicting TE structures and performing functional enrichment")
            .with_estimated_duration("10-15 minutes")
            .with_task(
                task("structure_prediction", "viennarna", "Predicting 2D/3D structures with ViennaRNA")
                    .with_input("te_families")
                    .with_output("te_structures"),
            )
            .with_task(
                task("go_enrichment", "enrichment", "GO enrichment analysis")
                    .with_input("target_genes")
                    .with_output("go_enrichment")
                    .independent(),
            )
            .with_task(
                task("pathway_analysis", "enrichment", "Pathway analysis")
                    .with_input("target_genes")
                    .with_output("pathways")
                    .independent(),
            )
            .with_task(
                task("comparative_expression", "deseq2", "Comparative expression analysis")
                    .with_input("differential_expression")
                    .with_input("target_genes")
                    .with_output("comparative_expression"),
            ),
        StageDefinition::new(5, "Results Generation")
            .with_description("Generating visualizations and preparing downloadable reports")
            .with_estimated_duration("5 minutes")
            .with_task(
                task("interactive_plots", "report", "Creating interactive plots")
                    .with_input("differential_expression")
                    .with_input("go_enrichment")
                    .with_output("plots"),
            )
            .with_task(
                task("browser_tracks", "report", "Generating genome browser tracks")
                    .with_input("te_coordinates")
                    .with_input("genome_annotation")
                    .with_output("browser_tracks"),
            )
            .with_task(
                task("summary_statistics", "report", "Preparing summary statistics")
                    .with_input("qc_metrics")
                    .with_input("target_genes")
                    .with_output("summary_statistics"),
            )
            .with_task(
                task("downloadable_report", "report", "Creating downloadable reports")
                    .with_input("plots")
                    .with_input("summary_statistics")
                    .with_output("report"),
            ),
    ];

    let stages = stages
        .into_iter()
        .map(|stage| stage.with_retry(retry.clone()))
        .collect();
    PipelineDefinition::new(GENOMICS_PIPELINE, stages)
}

/// Loads the configured pipeline file, or the built-in workflow.
pub fn load_pipeline(config: &OrchestratorConfig) -> Result<PipelineDefinition, DefinitionError> {
    match &config.pipeline_file {
        Some(path) => {
            let definition = PipelineDefinition::from_file(path)?;
            info!(
                path = %path.display(),
                pipeline = %definition.name,
                stages = definition.stage_count(),
                "Loaded pipeline definition"
            );
            Ok(definition)
        }
        None => genomics_pipeline(&config.default_retry),
    }
}

/// Builds the adapter registry for a pipeline according to the adapter mode.
#[must_use]
pub fn default_adapters(
    definition: &PipelineDefinition,
    config: &OrchestratorConfig,
) -> AdapterRegistry {
    let runner: Arc<dyn TaskRunner> = match config.adapter_mode {
        AdapterMode::Simulated => Arc::new(SimulatedAdapter::new(
            config.simulated_min_delay_ms..=config.simulated_max_delay_ms,
        )),
        AdapterMode::Command => Arc::new(CommandAdapter::new(&config.work_dir)),
    };
    AdapterRegistry::uniform(definition, runner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_genomics_pipeline_shape() {
        let def = genomics_pipeline(&RetryPolicy::default()).unwrap();
        assert_eq!(def.stage_count(), 6);
        assert!(def.stages.iter().all(|s| s.tasks.len() == 4));
        assert_eq!(def.stages[1].estimated_duration.as_deref(), Some("15-30 minutes"));
        assert_eq!(def.stages[2].tasks[1].display_name(), "Salmon quantification");
    }

    #[test]
    fn test_every_required_input_is_produced_earlier() {
        let def = genomics_pipeline(&RetryPolicy::default()).unwrap();
        let mut available: HashSet<String> = [
            "hostGenome",
            "parasiteGenome",
            "hostTranscriptome",
            "parasiteTranscriptome",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        for stage in &def.stages {
            for task in &stage.tasks {
                for input in task.inputs.iter().filter(|i| !i.optional) {
                    assert!(
                        available.contains(&input.key),
                        "{} needs {} before it is produced",
                        task.name,
                        input.key
                    );
                }
                available.extend(task.outputs.iter().cloned());
            }
        }
    }

    #[test]
    fn test_retry_policy_applied_to_every_stage() {
        let retry = RetryPolicy::default().with_max_attempts(5);
        let def = genomics_pipeline(&retry).unwrap();
        assert!(def.stages.iter().all(|s| s.retry.max_attempts == 5));
    }

    #[test]
    fn test_load_pipeline_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{"name": "mini", "stages": [
                {"ordinal": 0, "name": "qc", "tasks": [{"name": "stats", "adapter": "seqkit"}]}
            ]}"#,
        )
        .unwrap();

        let config = OrchestratorConfig::default().with_pipeline_file(&path);
        let def = load_pipeline(&config).unwrap();
        assert_eq!(def.name, "mini");

        let adapters = default_adapters(&def, &config);
        assert_eq!(adapters.names(), vec!["seqkit"]);
    }

    #[test]
    fn test_load_pipeline_defaults_to_catalog() {
        let def = load_pipeline(&OrchestratorConfig::default()).unwrap();
        assert_eq!(def.name, GENOMICS_PIPELINE);
    }
}
