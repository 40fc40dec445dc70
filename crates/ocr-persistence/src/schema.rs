// Esquema Diesel para SQLite.
// Tablas: templates, jobs, document_results
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    templates (id) {
        id -> Text,
        name -> Text,
        owner -> Text,
        version -> BigInt,
        payload -> Text,
        updated_at_ts -> BigInt,
    }
}
diesel::table! {
    jobs (id) {
        id -> Text,
        template_id -> Text,
        status -> Text,
        template_snapshot -> Text,
        document_set -> Text,
        created_at_ts -> BigInt,
        completed_at_ts -> Nullable<BigInt>,
        total -> BigInt,
        processed -> BigInt,
        failed -> BigInt,
    }
}
diesel::table! {
    document_results (job_id, document_ref) {
        job_id -> Text,
        document_ref -> Text,
        status -> Text,
        payload -> Text,
        updated_at_ts -> BigInt,
    }
}
diesel::joinable!(document_results -> jobs (job_id));
allow_tables_to_appear_in_same_query!(templates, jobs, document_results);
