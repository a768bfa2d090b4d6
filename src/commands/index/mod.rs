mod corpus;
mod run;

pub(crate) use run::run;
