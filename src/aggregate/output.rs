//! Tabular writers for aggregated results.

use crate::data::{FitStatus, GeneRankRecord, SpeciesPrediction, StatusRecord};
use crate::error::Result;
use csv::WriterBuilder;
use std::io::Write;

/// Write species predictions:
/// `combo,lambda1,lambda2,penalty_term,num_genes,input_rmse,species,sps,true_phenotype`.
pub fn write_species_predictions<'a, W, I>(writer: W, predictions: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a SpeciesPrediction>,
{
    let mut csv = WriterBuilder::new().from_writer(writer);
    csv.write_record([
        "combo",
        "lambda1",
        "lambda2",
        "penalty_term",
        "num_genes",
        "input_rmse",
        "species",
        "sps",
        "true_phenotype",
    ])?;
    for p in predictions {
        let phenotype = p
            .true_phenotype
            .map(|l| l.value().to_string())
            .unwrap_or_default();
        csv.write_record([
            p.combination.clone(),
            p.point.lambda1.to_string(),
            p.point.lambda2.to_string(),
            p.point.penalty_label(),
            p.num_genes.to_string(),
            p.input_rmse.to_string(),
            p.species.clone(),
            p.sps.to_string(),
            phenotype,
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Write gene ranks:
/// `gene_name,num_combos_ranked,num_combos_ranked_top,highest_ever_gss,best_ever_rank`.
///
/// `best_ever_rank` is empty for genes that were never ranked.
pub fn write_gene_ranks<W: Write>(writer: W, records: &[GeneRankRecord]) -> Result<()> {
    let mut csv = WriterBuilder::new().from_writer(writer);
    csv.write_record([
        "gene_name",
        "num_combos_ranked",
        "num_combos_ranked_top",
        "highest_ever_gss",
        "best_ever_rank",
    ])?;
    for r in records {
        csv.write_record([
            r.gene.clone(),
            r.num_combos_ranked.to_string(),
            r.num_combos_ranked_top.to_string(),
            r.highest_ever_gss.to_string(),
            r.best_ever_rank.map(|v| v.to_string()).unwrap_or_default(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Write selected sites: `gene_name,position,pss`, one row per site with
/// nonzero PSS in any model, in gene rank order.
pub fn write_selected_sites<W: Write>(writer: W, records: &[GeneRankRecord]) -> Result<()> {
    let mut csv = WriterBuilder::new().from_writer(writer);
    csv.write_record(["gene_name", "position", "pss"])?;
    for r in records {
        for (position, pss) in &r.selected_sites {
            csv.write_record([r.gene.clone(), position.to_string(), pss.to_string()])?;
        }
    }
    csv.flush()?;
    Ok(())
}

/// Write every non-converged model:
/// `combo,lambda1,lambda2,penalty_term,status,message`.
pub fn write_model_status<W: Write>(writer: W, records: &[StatusRecord]) -> Result<()> {
    let mut csv = WriterBuilder::new().from_writer(writer);
    csv.write_record([
        "combo",
        "lambda1",
        "lambda2",
        "penalty_term",
        "status",
        "message",
    ])?;
    for r in records {
        let message = match &r.status {
            FitStatus::Failed { reason } => reason.clone(),
            _ => String::new(),
        };
        csv.write_record([
            r.key.combination.clone(),
            r.key.point.lambda1.to_string(),
            r.key.point.lambda2.to_string(),
            r.key.point.penalty_label(),
            r.status.name().to_string(),
            message,
        ])?;
    }
    csv.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Label, ModelKey};
    use crate::grid::GridPoint;

    #[test]
    fn test_prediction_rows() {
        let p = SpeciesPrediction {
            combination: "combo_0".into(),
            point: GridPoint::new(0.1, 0.2, None),
            num_genes: 3,
            input_rmse: 0.5,
            species: "sp1".into(),
            sps: -0.25,
            true_phenotype: Some(Label::Control),
        };
        let mut buf = Vec::new();
        write_species_predictions(&mut buf, [&p]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "combo,lambda1,lambda2,penalty_term,num_genes,input_rmse,species,sps,true_phenotype"
        );
        assert_eq!(lines[1], "combo_0,0.1,0.2,NA,3,0.5,sp1,-0.25,-1");
    }

    #[test]
    fn test_gene_rank_and_site_rows() {
        let records = vec![
            GeneRankRecord {
                gene: "g1".into(),
                num_combos_ranked: 2,
                num_combos_ranked_top: 1,
                highest_ever_gss: 0.75,
                best_ever_rank: Some(1),
                selected_sites: vec![(4, 0.5), (9, 0.25)],
            },
            GeneRankRecord {
                gene: "g2".into(),
                num_combos_ranked: 0,
                num_combos_ranked_top: 0,
                highest_ever_gss: 0.0,
                best_ever_rank: None,
                selected_sites: vec![],
            },
        ];
        let mut ranks = Vec::new();
        write_gene_ranks(&mut ranks, &records).unwrap();
        let ranks = String::from_utf8(ranks).unwrap();
        assert_eq!(ranks.lines().nth(1), Some("g1,2,1,0.75,1"));
        assert_eq!(ranks.lines().nth(2), Some("g2,0,0,0,"));

        let mut sites = Vec::new();
        write_selected_sites(&mut sites, &records).unwrap();
        let sites = String::from_utf8(sites).unwrap();
        assert_eq!(sites.lines().count(), 3);
        assert_eq!(sites.lines().nth(2), Some("g1,9,0.25"));
    }

    #[test]
    fn test_status_rows() {
        let records = vec![StatusRecord {
            key: ModelKey {
                combination: "combo_3".into(),
                point: GridPoint::new(0.5, 0.25, Some(2.0)),
            },
            status: FitStatus::Failed {
                reason: "no convergence".into(),
            },
        }];
        let mut buf = Vec::new();
        write_model_status(&mut buf, &records).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().nth(1), Some("combo_3,0.5,0.25,2,failed,no convergence"));
    }
}
