use elq_convert::{ExpressionConverter, Funcletizer};
use elq_expr::{BinOp, Expr, Lambda, ParamGen, QueryExpr};
use elq_model::{EntitySet, EntityType, Model, PrimitiveKind, Property, TypeUsage};
use elq_tree::ExpressionPrinter;

fn main() {
    let mut model = Model::new();
    model.add_entity_type(EntityType {
        name: "Run".to_string(),
        properties: vec![
            Property {
                name: "Id".to_string(),
                ty: TypeUsage::Primitive(PrimitiveKind::Int32),
                nullable: false,
            },
            Property {
                name: "Name".to_string(),
                ty: TypeUsage::Primitive(PrimitiveKind::String),
                nullable: true,
            },
        ],
    });
    model.add_entity_set(EntitySet {
        name: "Runs".to_string(),
        entity_type: "Run".to_string(),
    });

    // from r in Runs where r.Id > threshold select r.Name
    let mut gen = ParamGen::new();
    let r = gen.fresh("r");
    let r2 = gen.fresh("r");
    let query = QueryExpr::source("Runs")
        .filter(Lambda::new(
            r.clone(),
            Expr::binary(
                BinOp::Gt,
                Expr::property(Expr::param(&r), "Id"),
                Expr::captured("threshold", 10i64),
            ),
        ))
        .select(Lambda::new(r2.clone(), Expr::property(Expr::param(&r2), "Name")));

    match ExpressionConverter::new(&model, Funcletizer::root(), query).convert() {
        Ok(tree) => print!("{}", ExpressionPrinter::new().print(&tree)),
        Err(e) => println!("Error: {}", e),
    }
}
