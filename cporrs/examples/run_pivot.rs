use cpor::pivot::{self, ExecutionBudget, PivotQuery};
use cpor::{load_dataset, DatasetStore};

const SAMPLE: &str = "\
Região;Produto;Valor Estimado
Norte;A;R$ 1.200,50
Norte;B;R$ 800,00
Sul;A;R$ 430,25
Sul;B;R$ 150,00
";

fn main() -> anyhow::Result<()> {
    let store = DatasetStore::new();
    let dataset = load_dataset(&store, SAMPLE.as_bytes(), "vendas.csv", "vendas")?;

    let query: PivotQuery = serde_json::from_value(serde_json::json!({
        "datasetId": dataset.id,
        "rows": ["regiao"],
        "columns": ["produto"],
        "measures": ["valor_estimado"],
        "aggregator": "sum",
    }))?;

    let result = pivot::execute(&dataset, &query, &ExecutionBudget::default())?;
    println!("colunas: {:?}", result.column_headers);
    for (header, row) in result.row_headers.iter().zip(&result.values) {
        println!("{header:?}: {row:?}");
    }
    println!("totais: {:?} (geral: {:?})", result.column_totals, result.grand_total);
    Ok(())
}
