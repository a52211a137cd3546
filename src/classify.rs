//! Rule-based post classification.
//!
//! Classification happens in two steps, both pure and deterministic:
//!
//! 1. **Category**: an ordered list of URL-substring rules is evaluated
//!    against the lowercased URL; the first match wins. Order matters because
//!    the substrings overlap (a driver URL may also contain `moto`).
//! 2. **Topic clusters**: for the category's ordered cluster table, a cluster
//!    is included when any of its keywords appears as a case-insensitive
//!    substring of `title + " " + summary`. Multiple clusters may match.
//!
//! The keyword tables are immutable configuration, built once and never
//! mutated at runtime. Keywords are Portuguese because the harvested blog is.

use serde::{Deserialize, Serialize};

/// Coarse post category, derived from the URL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Category {
    Driver,
    Payment,
    Moto,
    Food,
    Other,
}

impl Category {
    /// Stable label used in tabular output and generic cluster names.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Driver => "Driver",
            Category::Payment => "Payment",
            Category::Moto => "Moto",
            Category::Food => "Food",
            Category::Other => "Other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One topic cluster: name plus the keywords that select it.
type Cluster = (&'static str, &'static [&'static str]);

const PAYMENT_CLUSTERS: &[Cluster] = &[
    (
        "Minhas Finanças",
        &[
            "conta de luz",
            "conta de água",
            "economizar dinheiro",
            "gastos mensais",
            "planilha de gastos",
            "render dinheiro",
            "guardar dinheiro",
            "controle de gastos mensais",
            "planejamento financeiro familiar",
            "endividamento",
        ],
    ),
    (
        "Renda Extra",
        &["renda extra", "freelancer", "empreendedorismo", "microempreendedorismo"],
    ),
    (
        "Quero Investir",
        &["cdi", "taxa selic", "lucratividade", "rendimento", "metas financeiras", "criptomoedas"],
    ),
    (
        "Vida de empreendedor",
        &["empreendedorismo", "empreender", "negócios", "novos negócios"],
    ),
    (
        "Tributos e Impostos",
        &[
            "iptu",
            "imposto de renda",
            "mei",
            "me",
            "restituição de imposto de renda",
            "darf",
            "ipva",
            "cartão de crédito",
        ],
    ),
    (
        "Notícias de Economia",
        &["tarifaço", "ios", "economia", "dicas de economia", "notícias", "selic", "inflação"],
    ),
    (
        "Meu Negócio",
        &["gestão financeira", "controle financiero", "mei", "autônomo"],
    ),
    (
        "Por Dentro da 99Pay",
        &["app da 99pay", "funcionalidades", "lucratividade"],
    ),
    (
        "Empréstimo",
        &[
            "vantagens empréstimos 99pay",
            "empréstimo 99pay",
            "educação financeira",
            "crédito pessoal",
        ],
    ),
    (
        "Dinheiro Delas",
        &["mulheres empreendedoras", "mulheres chefes de casa", "empreendedora", "mães"],
    ),
];

const DRIVER_CLUSTERS: &[Cluster] = &[
    ("Multas", &["multa", "infração", "legislação", "lei", "pontos na cnh", "blitz"]),
    (
        "Documentos",
        &["documento", "licenciamento", "regularização", "transferência", "detran", "papelada"],
    ),
    (
        "Seguro",
        &["seguro", "proteção", "assistência", "apólice", "sinistro", "cobertura"],
    ),
    (
        "CNH",
        &["cnh", "habilitação", "recurso", "pontuação", "suspensão", "renovação cnh"],
    ),
    ("Impostos", &["impostos", "ipva", "spvat", "tributo veicular", "taxas"]),
    (
        "Carros",
        &[
            "tipos de carro",
            "chassi",
            "modelos",
            "veículo",
            "automóvel",
            "carro novo",
            "carro usado",
            "junta de cabeçote",
            "motor",
        ],
    ),
    (
        "Manutenção",
        &[
            "manutenção",
            "peças",
            "mecânica",
            "revisão",
            "troca de óleo",
            "pneu",
            "alinhamento",
            "balanceamento",
            "freios",
            "suspensão",
            "óleo",
            "filtro",
        ],
    ),
    (
        "Segurança",
        &["segurança", "direção", "acidente", "saúde", "riscos", "prevenção", "direção segura"],
    ),
    (
        "Combustível",
        &["combustível", "gasolina", "etanol", "diesel", "abastecer", "preço da gasolina"],
    ),
    (
        "Compra de carro",
        &[
            "compra de carro",
            "aluguel de carro",
            "consórcio",
            "financiamento de carro",
            "venda de carro",
            "leasing",
        ],
    ),
];

const MOTO_CLUSTERS: &[Cluster] = &[
    (
        "Segurança Moto",
        &[
            "segurança moto",
            "capacete",
            "equipamento moto",
            "pilotagem segura",
            "direção defensiva moto",
            "acidente moto",
        ],
    ),
    (
        "Manutenção Moto",
        &["manutenção moto", "pneu moto", "óleo moto", "revisão moto", "peças moto"],
    ),
    ("Legislação Moto", &["cnh moto", "multa moto", "lei seca moto"]),
    ("Dicas de Pilotagem", &["pilotar moto", "motociclismo", "viagem de moto"]),
];

const FOOD_CLUSTERS: &[Cluster] = &[
    (
        "Culinária e Receitas",
        &["receita", "culinária", "ingredientes", "cozinhar", "comida caseira", "pratos"],
    ),
    (
        "Restaurantes e Bares",
        &["restaurante", "bar", "melhores lugares", "onde comer", "gastronomia", "delivery"],
    ),
    (
        "Dicas de Alimentação",
        &["alimentação saudável", "dieta", "nutrição", "alimentos"],
    ),
    (
        "Pedidos Online",
        &["pedido online", "aplicativo comida", "delivery de comida"],
    ),
];

const OTHER_CLUSTERS: &[Cluster] = &[
    (
        "Notícias Gerais",
        &["notícias", "atualidade", "eventos", "novidades", "acontecimentos"],
    ),
    (
        "Dicas Gerais",
        &["dicas", "tutoriais", "como fazer", "passo a passo", "guia"],
    ),
    ("Tecnologia", &["tecnologia", "inovação", "aplicativos", "digital"]),
    (
        "Cultura e Lazer",
        &["filmes", "música", "livros", "entretenimento", "viagem", "lazer"],
    ),
];

/// Ordered cluster table for a category, if one is defined.
fn cluster_table(category: Category) -> Option<&'static [Cluster]> {
    match category {
        Category::Payment => Some(PAYMENT_CLUSTERS),
        Category::Driver => Some(DRIVER_CLUSTERS),
        Category::Moto => Some(MOTO_CLUSTERS),
        Category::Food => Some(FOOD_CLUSTERS),
        Category::Other => Some(OTHER_CLUSTERS),
    }
}

/// Assign a category from URL-substring rules; first match wins.
pub fn categorize(url: &str) -> Category {
    let url = url.to_lowercase();
    if url.contains("motorista") {
        Category::Driver
    } else if url.contains("99pay") || url.contains("99-pay") {
        Category::Payment
    } else if url.contains("moto") {
        Category::Moto
    } else if url.contains("food") {
        Category::Food
    } else {
        Category::Other
    }
}

/// Assign topic clusters from the category's keyword table.
///
/// The search text is the lowercased concatenation of title and summary. An
/// empty or whitespace-only search text yields the single label `No Content`
/// regardless of category. When no cluster matches, a generic fallback label
/// is produced instead of an empty set.
pub fn topic_clusters(category: Category, title: &str, summary: &str) -> Vec<String> {
    let search_text = format!("{} {}", title, summary).to_lowercase();
    if search_text.trim().is_empty() {
        return vec!["No Content".to_string()];
    }

    let mut identified: Vec<String> = Vec::new();
    if let Some(table) = cluster_table(category) {
        for (cluster_name, keywords) in table {
            let matched = keywords
                .iter()
                .any(|keyword| search_text.contains(&keyword.to_lowercase()));
            if matched && !identified.iter().any(|c| c == cluster_name) {
                identified.push((*cluster_name).to_string());
            }
        }
    }

    if identified.is_empty() {
        let fallback = match (category, cluster_table(category)) {
            (Category::Other, _) => "General".to_string(),
            (_, Some(_)) => format!("{} - Generic", category.label()),
            (_, None) => "Unknown Cluster - Generic".to_string(),
        };
        identified.push(fallback);
    }
    identified
}

/// Classify a post: category from the URL, clusters from title + summary.
///
/// Pure function; safe to re-run and to test in isolation.
pub fn classify(url: &str, title: &str, summary: &str) -> (Category, Vec<String>) {
    let category = categorize(url);
    let clusters = topic_clusters(category, title, summary);
    (category, clusters)
}
