#[allow(warnings, clippy::all)]
pub(crate) mod short_url {
    use sea_orm::entity::prelude::*;

    #[sea_orm::model]
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "urls")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub short_code: String,
        pub original_url: String,
        pub created_at: TimeDateTimeWithTimeZone,
        pub click_count: i64,
        pub is_active: bool,
        pub created_by_ip: Option<String>,
    }

    impl ActiveModelBehavior for ActiveModel {}
}
