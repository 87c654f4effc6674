use crate::stmt::Type;

/// A value type whose fields are flattened into the owning entity's table.
#[derive(Debug, Clone)]
pub struct Embeddable {
    pub id: EmbeddableId,
    pub name: String,
    pub fields: Vec<EmbeddableField>,
}

#[derive(Debug, Clone)]
pub struct EmbeddableField {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddableId(pub usize);

impl Embeddable {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn ty(&self) -> Type {
        Type::Record(self.fields.iter().map(|field| field.ty.clone()).collect())
    }
}
