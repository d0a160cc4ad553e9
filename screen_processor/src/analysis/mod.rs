pub mod collapse;
pub mod filter;
pub mod gene_scores;
pub mod mann_whitney;
pub mod phenotype;
pub mod plots;
pub mod pseudogenes;
pub mod replicates;
